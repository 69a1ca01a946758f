/// Module des unités de temps (timeframes) supportées par le provider
///
/// Ce module centralise la correspondance entre les timeframes, leur largeur
/// canonique en millisecondes et les endpoints de l'API Upbit
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timeframe supporté par le provider
///
/// DESIGN: Enum fermé (variant dispatch, pas d'héritage)
/// Ajouter un timeframe est un changement cassant volontaire: chaque
/// site de dispatch doit être mis à jour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    /// Liste complète des timeframes, du plus fin au plus large
    pub const ALL: [Timeframe; 12] = [
        Timeframe::S1,
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M10,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    /// Largeur canonique d'une bougie en millisecondes
    ///
    /// RETOUR: None pour `1M`: le mois calendaire n'a pas de largeur fixe,
    /// l'arithmétique passe par `TimeGrid::advance`
    pub fn tick_ms(&self) -> Option<i64> {
        match self {
            Timeframe::S1 => Some(1_000),
            Timeframe::M1 => Some(60_000),
            Timeframe::M3 => Some(180_000),
            Timeframe::M5 => Some(300_000),
            Timeframe::M10 => Some(600_000),
            Timeframe::M15 => Some(900_000),
            Timeframe::M30 => Some(1_800_000),
            Timeframe::H1 => Some(3_600_000),
            Timeframe::H4 => Some(14_400_000),
            Timeframe::D1 => Some(86_400_000),
            Timeframe::W1 => Some(604_800_000),
            Timeframe::Mo1 => None,
        }
    }

    /// Chemin de l'endpoint Upbit pour ce timeframe
    ///
    /// Les timeframes intra-journaliers passent par /candles/minutes/{unit},
    /// les autres ont un endpoint dédié
    pub fn upbit_path(&self) -> &'static str {
        match self {
            Timeframe::S1 => "candles/seconds",
            Timeframe::M1 => "candles/minutes/1",
            Timeframe::M3 => "candles/minutes/3",
            Timeframe::M5 => "candles/minutes/5",
            Timeframe::M10 => "candles/minutes/10",
            Timeframe::M15 => "candles/minutes/15",
            Timeframe::M30 => "candles/minutes/30",
            Timeframe::H1 => "candles/minutes/60",
            Timeframe::H4 => "candles/minutes/240",
            Timeframe::D1 => "candles/days",
            Timeframe::W1 => "candles/weeks",
            Timeframe::Mo1 => "candles/months",
        }
    }

    /// Parse un timeframe depuis sa forme texte ("5m", "1h", "1M", ...)
    pub fn from_str_loose(s: &str) -> Option<Timeframe> {
        match s {
            "1s" => Some(Timeframe::S1),
            "1m" => Some(Timeframe::M1),
            "3m" => Some(Timeframe::M3),
            "5m" => Some(Timeframe::M5),
            "10m" => Some(Timeframe::M10),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            "1w" => Some(Timeframe::W1),
            "1M" => Some(Timeframe::Mo1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_widths_match_labels() {
        assert_eq!(Timeframe::S1.tick_ms(), Some(1_000));
        assert_eq!(Timeframe::M5.tick_ms(), Some(300_000));
        assert_eq!(Timeframe::H4.tick_ms(), Some(14_400_000));
        assert_eq!(Timeframe::W1.tick_ms(), Some(604_800_000));
        // Le mois calendaire n'a pas de largeur fixe
        assert_eq!(Timeframe::Mo1.tick_ms(), None);
    }

    #[test]
    fn round_trip_from_str() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::from_str_loose(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::from_str_loose("2h"), None);
        assert_eq!(Timeframe::from_str_loose(""), None);
    }

    #[test]
    fn upbit_paths() {
        assert_eq!(Timeframe::M1.upbit_path(), "candles/minutes/1");
        assert_eq!(Timeframe::H1.upbit_path(), "candles/minutes/60");
        assert_eq!(Timeframe::H4.upbit_path(), "candles/minutes/240");
        assert_eq!(Timeframe::S1.upbit_path(), "candles/seconds");
        assert_eq!(Timeframe::Mo1.upbit_path(), "candles/months");
    }
}
