/// Modèle de données du provider: bougies et plages alignées
///
/// Tous les timestamps sont des epoch millisecondes UTC (i64), alignés sur
/// les frontières du timeframe partout où le contrat l'exige
use serde::{Deserialize, Serialize};

/// Provenance d'une ligne persistée
///
/// DESIGN: Enum fermé à deux variantes.
/// - Real: ligne retournée par l'exchange
/// - EmptyCopy: ligne synthétisée pour une frontière sans trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    Real,
    EmptyCopy,
}

impl SourceTag {
    /// Représentation stockée en base (colonne INTEGER)
    pub fn as_db(&self) -> i64 {
        match self {
            SourceTag::Real => 0,
            SourceTag::EmptyCopy => 1,
        }
    }

    pub fn from_db(v: i64) -> SourceTag {
        if v == 0 {
            SourceTag::Real
        } else {
            SourceTag::EmptyCopy
        }
    }
}

/// Une bougie OHLCV, clé `(symbol, timeframe, utc_boundary)` en base
///
/// Le symbole et le timeframe sont portés par la partition, pas par la
/// ligne en mémoire. Invariant: `utc_boundary` est exactement aligné sur
/// le timeframe de sa partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub utc_boundary: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume en devise de base (ex: BTC pour KRW-BTC)
    pub volume_base: f64,
    /// Volume en devise de cotation (ex: KRW pour KRW-BTC)
    pub volume_quote: f64,
    /// Nombre de trades (absent chez Upbit, toujours None pour EmptyCopy)
    pub trade_count: Option<i64>,
    pub source_tag: SourceTag,
    /// Frontière alignée de la bougie Real de référence, Some ssi EmptyCopy
    pub copy_source_utc: Option<i64>,
}

impl Candle {
    pub fn is_real(&self) -> bool {
        self.source_tag == SourceTag::Real
    }

    /// Construit une bougie EmptyCopy pour une frontière sans trade
    ///
    /// OHLC à plat sur le close de la bougie de référence, volumes à zéro.
    /// `source_utc` doit pointer une ligne Real de la partition.
    pub fn empty_copy(utc_boundary: i64, source_utc: i64, source_close: f64) -> Candle {
        Candle {
            utc_boundary,
            open: source_close,
            high: source_close,
            low: source_close,
            close: source_close,
            volume_base: 0.0,
            volume_quote: 0.0,
            trade_count: None,
            source_tag: SourceTag::EmptyCopy,
            copy_source_utc: Some(source_utc),
        }
    }
}

/// Intervalle fermé de frontières alignées `[oldest, newest]`
///
/// Les deux bornes sont incluses et alignées; `oldest <= newest`.
/// Les réponses et requêtes du système étant ordonnées de la plus récente
/// à la plus ancienne, `newest` est la borne servie en premier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedRange {
    pub oldest: i64,
    pub newest: i64,
}

impl AlignedRange {
    pub fn new(oldest: i64, newest: i64) -> AlignedRange {
        debug_assert!(oldest <= newest);
        AlignedRange { oldest, newest }
    }

    pub fn contains(&self, boundary: i64) -> bool {
        self.oldest <= boundary && boundary <= self.newest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_copy_is_flat_and_tagged() {
        let c = Candle::empty_copy(600_000, 660_000, 123.5);
        assert_eq!(c.source_tag, SourceTag::EmptyCopy);
        assert_eq!(c.copy_source_utc, Some(660_000));
        assert_eq!(c.open, 123.5);
        assert_eq!(c.high, 123.5);
        assert_eq!(c.low, 123.5);
        assert_eq!(c.close, 123.5);
        assert_eq!(c.volume_base, 0.0);
        assert_eq!(c.volume_quote, 0.0);
        assert_eq!(c.trade_count, None);
    }

    #[test]
    fn source_tag_db_round_trip() {
        assert_eq!(SourceTag::from_db(SourceTag::Real.as_db()), SourceTag::Real);
        assert_eq!(
            SourceTag::from_db(SourceTag::EmptyCopy.as_db()),
            SourceTag::EmptyCopy
        );
    }

    #[test]
    fn range_contains_is_inclusive() {
        let r = AlignedRange::new(100, 300);
        assert!(r.contains(100));
        assert!(r.contains(300));
        assert!(!r.contains(99));
        assert!(!r.contains(301));
    }
}
