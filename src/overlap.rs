/// Classification du recouvrement entre une plage cible et les données stockées
///
/// ARCHITECTURE:
/// L'analyseur est une lecture pure du dépôt: il ne modifie jamais l'état.
/// Il réduit chaque plage cible à l'un des cinq statuts fermés et calcule
/// la plage API minimale à récupérer.
use crate::candle::AlignedRange;
use crate::error::Result;
use crate::repository::CandleRepository;
use crate::time_grid::TimeGrid;
use crate::timeframe::Timeframe;
use rusqlite::Connection;

/// Les cinq statuts de recouvrement possibles
///
/// DESIGN: Enum fermé. Ajouter un statut est un changement cassant qui doit
/// mettre à jour chaque site de dispatch de l'analyseur et du processeur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapStatus {
    /// Plage cible disjointe des données stockées
    NoOverlap,
    /// Plage cible entièrement couverte: aucun appel API nécessaire
    CompleteOverlap,
    /// Les données stockées couvrent le début (côté récent) de la cible,
    /// puis s'arrêtent
    PartialStart,
    /// Un seul trou dans la cible
    PartialMiddleContinuous,
    /// Deux trous ou plus: données stockées fragmentées
    PartialMiddleFragment,
}

/// Résultat de la classification
#[derive(Debug, Clone, Copy)]
pub struct OverlapAnalysis {
    pub status: OverlapStatus,
    /// Frontière stockée la plus récente dans la cible (absent si NoOverlap)
    pub db_newest: Option<i64>,
    /// Frontière stockée la plus ancienne dans la cible (absent si NoOverlap)
    pub db_oldest: Option<i64>,
    /// Plage minimale à demander à l'exchange (absent si CompleteOverlap)
    pub api_required: Option<AlignedRange>,
}

pub struct OverlapAnalyzer;

impl OverlapAnalyzer {
    /// Classifie `target` contre la partition stockée
    ///
    /// ALGORITHME:
    /// 1. count == 0 → NoOverlap, tout est à récupérer
    /// 2. count == attendu → CompleteOverlap, rien à récupérer
    /// 3. Sinon, inspection des trous:
    ///    - un seul trou collé au bord ancien → PartialStart
    ///    - un seul trou ailleurs → PartialMiddleContinuous
    ///    - deux trous ou plus → PartialMiddleFragment, avec une seule
    ///      plage couvrante: une fois fragmenté, un aller-retour unique
    ///      coûte moins cher que plusieurs appels soumis au rate limit
    pub fn classify(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        target: AlignedRange,
    ) -> Result<OverlapAnalysis> {
        let expected = TimeGrid::count_between(target.oldest, target.newest, tf)?;
        let stored = CandleRepository::count_in_range(conn, symbol, tf, target)?;

        if stored == 0 {
            return Ok(OverlapAnalysis {
                status: OverlapStatus::NoOverlap,
                db_newest: None,
                db_oldest: None,
                api_required: Some(target),
            });
        }

        if stored == expected {
            return Ok(OverlapAnalysis {
                status: OverlapStatus::CompleteOverlap,
                db_newest: Some(target.newest),
                db_oldest: Some(target.oldest),
                api_required: None,
            });
        }

        let bounds = CandleRepository::bounds_in_range(conn, symbol, tf, target)?
            .expect("stored > 0 implique des bornes");
        let gaps = CandleRepository::find_gaps_in_range(conn, symbol, tf, target)?;
        debug_assert!(!gaps.is_empty());

        let analysis = if gaps.len() == 1 {
            let gap = gaps[0];
            if gap.oldest == target.oldest {
                OverlapAnalysis {
                    status: OverlapStatus::PartialStart,
                    db_newest: Some(bounds.newest),
                    db_oldest: Some(bounds.oldest),
                    api_required: Some(gap),
                }
            } else {
                OverlapAnalysis {
                    status: OverlapStatus::PartialMiddleContinuous,
                    db_newest: Some(bounds.newest),
                    db_oldest: Some(bounds.oldest),
                    api_required: Some(gap),
                }
            }
        } else {
            // Une seule plage couvrante, du trou le plus ancien au plus récent
            let covering = AlignedRange::new(
                gaps.first().expect("non vide").oldest,
                gaps.last().expect("non vide").newest,
            );
            OverlapAnalysis {
                status: OverlapStatus::PartialMiddleFragment,
                db_newest: Some(bounds.newest),
                db_oldest: Some(bounds.oldest),
                api_required: Some(covering),
            }
        };

        Ok(analysis)
    }
}
