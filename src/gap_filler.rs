/// Densification des réponses de l'exchange
///
/// L'exchange ne retourne que les bougies où au moins un trade a eu lieu.
/// Ce module synthétise une ligne EmptyCopy pour chaque frontière alignée
/// que la réponse aurait dû couvrir mais a omise, afin que la séquence
/// persistée soit dense sur la grille du timeframe.
use crate::candle::{AlignedRange, Candle};
use crate::error::{ProviderError, Result};
use crate::time_grid::TimeGrid;
use crate::timeframe::Timeframe;

/// Ligne de référence immédiatement plus récente que la plage API
///
/// Requise dès que le chunk n'est pas le premier de la collecte: sans elle,
/// un trou à cheval entre la dernière ligne du chunk précédent et la
/// première ligne de cette réponse passerait silencieusement.
///
/// Si la ligne de référence est elle-même une EmptyCopy, sa propre source
/// est propagée: `source_utc` pointe toujours une ligne Real.
#[derive(Debug, Clone, Copy)]
pub struct FallbackReference {
    pub utc_boundary: i64,
    pub close: f64,
    pub source_utc: i64,
}

impl FallbackReference {
    /// Construit la référence depuis une ligne persistée de la partition
    pub fn from_candle(row: &Candle) -> FallbackReference {
        FallbackReference {
            utc_boundary: row.utc_boundary,
            close: row.close,
            source_utc: row.copy_source_utc.unwrap_or(row.utc_boundary),
        }
    }
}

/// Gestionnaire de densification des trous
pub struct GapFiller;

impl GapFiller {
    /// Comble les frontières manquantes de `api_range` dans la réponse
    ///
    /// ALGORITHME (vectorisé, pas de requête ligne à ligne):
    /// 1. Valide la réponse: frontières alignées, strictement décroissantes,
    ///    aucune plus récente que `api_range.newest`
    /// 2. Construit la chaîne `[fallback?] ++ réponse ++ sentinelle`, où la
    ///    sentinelle est la frontière sous `api_range.oldest`
    /// 3. Calcule les différences successives; tout écart strictement
    ///    supérieur à un tick est un trou
    /// 4. Chaque frontière d'un trou devient une EmptyCopy référençant
    ///    l'élément immédiatement plus récent de la chaîne
    ///
    /// Invariant de sortie: une ligne exactement par frontière de
    /// `[api_range.oldest, tête]`, où tête = `api_range.newest` si une
    /// référence existe, sinon la première ligne de la réponse (premier
    /// chunk d'une collecte: rien de plus récent n'est connu).
    ///
    /// RETOUR: réponse + lignes synthétisées, triées de la plus récente à
    /// la plus ancienne
    pub fn fill(
        rows: &[Candle],
        api_range: AlignedRange,
        tf: Timeframe,
        fallback: Option<&FallbackReference>,
    ) -> Result<Vec<Candle>> {
        Self::validate(rows, api_range, tf)?;

        // (frontière, close, source Real) de l'élément le plus récent connu
        let mut chain: Vec<(i64, f64, i64)> = Vec::with_capacity(rows.len() + 2);
        if let Some(fb) = fallback {
            if fb.utc_boundary <= api_range.newest {
                return Err(ProviderError::GapFill(format!(
                    "référence {} dans ou sous la plage demandée",
                    fb.utc_boundary
                )));
            }
            chain.push((fb.utc_boundary, fb.close, fb.source_utc));
        }
        for row in rows {
            chain.push((row.utc_boundary, row.close, row.utc_boundary));
        }

        if chain.is_empty() {
            // Premier chunk et réponse vide: limite historique, rien à ancrer
            return Ok(Vec::new());
        }

        let mut filled: Vec<Candle> = rows.to_vec();

        // Sentinelle sous le bord ancien: le segment entre la dernière ligne
        // connue et le bas de la plage est un trou comme un autre
        let sentinel = TimeGrid::advance(api_range.oldest, tf, -1)?;
        chain.push((sentinel, 0.0, 0));

        for pair in chain.windows(2) {
            let (newer, newer_close, newer_source) = pair[0];
            let (older, _, _) = pair[1];

            let span = TimeGrid::count_between(older, newer, tf)?;
            if span <= 2 {
                continue; // Adjacents: pas de trou
            }

            let gap_newest = TimeGrid::advance(newer, tf, -1)?;
            let gap_oldest = TimeGrid::advance(older, tf, 1)?;
            for boundary in TimeGrid::enumerate(gap_oldest, gap_newest, tf)? {
                filled.push(Candle::empty_copy(boundary, newer_source, newer_close));
            }
        }

        filled.sort_by(|a, b| b.utc_boundary.cmp(&a.utc_boundary));
        Ok(filled)
    }

    /// La réponse respecte-t-elle le contrat de l'exchange ?
    ///
    /// Une violation ici est un bug (du client ou de l'exchange), pas une
    /// donnée à contourner: on échoue immédiatement.
    fn validate(rows: &[Candle], api_range: AlignedRange, tf: Timeframe) -> Result<()> {
        let mut previous: Option<i64> = None;

        for row in rows {
            if !TimeGrid::is_aligned(row.utc_boundary, tf) {
                return Err(ProviderError::GapFill(format!(
                    "frontière non alignée sur {tf}: {}",
                    row.utc_boundary
                )));
            }
            if !api_range.contains(row.utc_boundary) {
                return Err(ProviderError::GapFill(format!(
                    "ligne hors de la plage demandée [{}, {}]: {}",
                    api_range.oldest, api_range.newest, row.utc_boundary
                )));
            }
            if let Some(prev) = previous {
                if row.utc_boundary >= prev {
                    return Err(ProviderError::GapFill(format!(
                        "réponse non strictement décroissante: {} après {}",
                        row.utc_boundary, prev
                    )));
                }
            }
            previous = Some(row.utc_boundary);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::SourceTag;

    const SEC: i64 = 1_000;
    const MIN: i64 = 60_000;

    fn real(boundary: i64, close: f64) -> Candle {
        Candle {
            utc_boundary: boundary,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume_base: 1.0,
            volume_quote: 100.0,
            trade_count: Some(3),
            source_tag: SourceTag::Real,
            copy_source_utc: None,
        }
    }

    fn boundaries(rows: &[Candle]) -> Vec<i64> {
        rows.iter().map(|c| c.utc_boundary).collect()
    }

    #[test]
    fn sparse_seconds_response_is_densified() {
        // count=10, to=T: l'exchange retourne T-1, T-3, T-6, T-7
        let t = 100 * SEC;
        let rows = vec![
            real(t - SEC, 10.0),
            real(t - 3 * SEC, 9.0),
            real(t - 6 * SEC, 8.0),
            real(t - 7 * SEC, 7.0),
        ];
        let range = AlignedRange::new(t - 10 * SEC, t - SEC);

        let filled = GapFiller::fill(&rows, range, Timeframe::S1, None).unwrap();

        assert_eq!(filled.len(), 10);
        let expected: Vec<i64> = (1..=10).map(|i| t - i * SEC).collect();
        assert_eq!(boundaries(&filled), expected);

        let empties: Vec<&Candle> = filled.iter().filter(|c| !c.is_real()).collect();
        assert_eq!(empties.len(), 6);

        // Chaque EmptyCopy référence la Real immédiatement plus récente
        let by_boundary = |b: i64| filled.iter().find(|c| c.utc_boundary == b).unwrap();
        assert_eq!(by_boundary(t - 2 * SEC).copy_source_utc, Some(t - SEC));
        assert_eq!(by_boundary(t - 4 * SEC).copy_source_utc, Some(t - 3 * SEC));
        assert_eq!(by_boundary(t - 5 * SEC).copy_source_utc, Some(t - 3 * SEC));
        assert_eq!(by_boundary(t - 8 * SEC).copy_source_utc, Some(t - 7 * SEC));
        assert_eq!(by_boundary(t - 10 * SEC).copy_source_utc, Some(t - 7 * SEC));

        // OHLC à plat sur le close de la source, volumes nuls
        let e = by_boundary(t - 4 * SEC);
        assert_eq!(e.open, 9.0);
        assert_eq!(e.high, 9.0);
        assert_eq!(e.low, 9.0);
        assert_eq!(e.close, 9.0);
        assert_eq!(e.volume_base, 0.0);
        assert_eq!(e.volume_quote, 0.0);
    }

    #[test]
    fn cross_chunk_gap_uses_fallback_reference() {
        // Le chunk précédent s'est arrêté à 00:46; cette réponse commence
        // à 00:43: 00:45 et 00:44 manquent à cheval sur la frontière
        let m = |x: i64| x * MIN;
        let rows = vec![real(m(43), 5.0), real(m(42), 4.0)];
        let range = AlignedRange::new(m(42), m(45));
        let fb = FallbackReference {
            utc_boundary: m(46),
            close: 6.5,
            source_utc: m(46),
        };

        let filled = GapFiller::fill(&rows, range, Timeframe::M1, Some(&fb)).unwrap();

        assert_eq!(boundaries(&filled), vec![m(45), m(44), m(43), m(42)]);
        let c45 = &filled[0];
        let c44 = &filled[1];
        assert_eq!(c45.source_tag, SourceTag::EmptyCopy);
        assert_eq!(c45.copy_source_utc, Some(m(46)));
        assert_eq!(c45.close, 6.5);
        assert_eq!(c44.copy_source_utc, Some(m(46)));
        assert!(filled[2].is_real());
    }

    #[test]
    fn fallback_empty_copy_propagates_real_source() {
        // La ligne de référence est elle-même une EmptyCopy pointant 00:48
        let m = |x: i64| x * MIN;
        let reference_row = Candle::empty_copy(m(46), m(48), 7.0);
        let fb = FallbackReference::from_candle(&reference_row);
        assert_eq!(fb.source_utc, m(48));

        let rows = vec![real(m(44), 5.0)];
        let range = AlignedRange::new(m(44), m(45));
        let filled = GapFiller::fill(&rows, range, Timeframe::M1, Some(&fb)).unwrap();

        assert_eq!(boundaries(&filled), vec![m(45), m(44)]);
        // La source traverse l'EmptyCopy intermédiaire et reste une Real
        assert_eq!(filled[0].copy_source_utc, Some(m(48)));
    }

    #[test]
    fn empty_response_with_fallback_fills_whole_range() {
        // Plage entière sans trade: tout devient EmptyCopy
        let m = |x: i64| x * MIN;
        let fb = FallbackReference {
            utc_boundary: m(50),
            close: 3.0,
            source_utc: m(50),
        };
        let range = AlignedRange::new(m(46), m(49));

        let filled = GapFiller::fill(&[], range, Timeframe::M1, Some(&fb)).unwrap();

        assert_eq!(boundaries(&filled), vec![m(49), m(48), m(47), m(46)]);
        assert!(filled.iter().all(|c| !c.is_real()));
        assert!(filled.iter().all(|c| c.copy_source_utc == Some(m(50))));
    }

    #[test]
    fn empty_response_without_fallback_yields_nothing() {
        let range = AlignedRange::new(0, 5 * MIN);
        let filled = GapFiller::fill(&[], range, Timeframe::M1, None).unwrap();
        assert!(filled.is_empty());
    }

    #[test]
    fn first_chunk_without_fallback_starts_at_first_row() {
        // Pas de référence: rien ne permet de synthétiser au-dessus de la
        // première ligne retournée
        let m = |x: i64| x * MIN;
        let rows = vec![real(m(47), 2.0), real(m(45), 1.0)];
        let range = AlignedRange::new(m(45), m(49));

        let filled = GapFiller::fill(&rows, range, Timeframe::M1, None).unwrap();

        assert_eq!(boundaries(&filled), vec![m(47), m(46), m(45)]);
        assert_eq!(filled[1].copy_source_utc, Some(m(47)));
    }

    #[test]
    fn rejects_unsorted_response() {
        let rows = vec![real(MIN, 1.0), real(2 * MIN, 2.0)];
        let range = AlignedRange::new(MIN, 2 * MIN);
        let err = GapFiller::fill(&rows, range, Timeframe::M1, None).unwrap_err();
        assert!(matches!(err, ProviderError::GapFill(_)));
    }

    #[test]
    fn rejects_duplicate_boundary() {
        let rows = vec![real(MIN, 1.0), real(MIN, 1.0)];
        let range = AlignedRange::new(MIN, 2 * MIN);
        assert!(GapFiller::fill(&rows, range, Timeframe::M1, None).is_err());
    }

    #[test]
    fn rejects_unaligned_boundary() {
        let rows = vec![real(MIN + 5, 1.0)];
        let range = AlignedRange::new(MIN, 2 * MIN);
        assert!(GapFiller::fill(&rows, range, Timeframe::M1, None).is_err());
    }

    #[test]
    fn rejects_row_newer_than_range() {
        let rows = vec![real(3 * MIN, 1.0)];
        let range = AlignedRange::new(MIN, 2 * MIN);
        assert!(GapFiller::fill(&rows, range, Timeframe::M1, None).is_err());
    }
}
