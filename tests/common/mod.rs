use upbit_candles_provider::candle::{Candle, SourceTag};
use upbit_candles_provider::time_grid::TimeGrid;
use upbit_candles_provider::timeframe::Timeframe;

pub const MIN: i64 = 60_000;
/// 2025-09-09T00:00:00Z
pub const BASE: i64 = 1_757_376_000_000;

/// Bougie réelle à la minute `m` (relative à BASE)
pub fn real_minute(m: i64, close: f64) -> Candle {
    real_at(BASE + m * MIN, close)
}

pub fn real_at(boundary: i64, close: f64) -> Candle {
    Candle {
        utc_boundary: boundary,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume_base: 2.0,
        volume_quote: close * 2.0,
        trade_count: None,
        source_tag: SourceTag::Real,
        copy_source_utc: None,
    }
}

/// Série de bougies minute continues sur `[from_min, to_min]`
pub fn minute_series(from_min: i64, to_min: i64) -> Vec<Candle> {
    (from_min..=to_min)
        .map(|m| real_minute(m, 100.0 + m as f64))
        .collect()
}

/// Chemin d'une base de test jetable, nettoyée avant usage
pub fn temp_db(name: &str) -> String {
    let path = std::env::temp_dir().join(format!(
        "upbit_provider_test_{}_{}.db",
        name,
        std::process::id()
    ));
    let path = path.to_string_lossy().to_string();
    // Nettoyer la base et ses fichiers WAL d'une exécution précédente
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(format!("{path}-wal"));
    let _ = std::fs::remove_file(format!("{path}-shm"));
    path
}

/// Vérifie les invariants universels d'une séquence retournée:
/// décroissante stricte, alignée, dense, sans doublon
pub fn assert_dense_descending(rows: &[Candle], tf: Timeframe) {
    for row in rows {
        assert!(
            TimeGrid::is_aligned(row.utc_boundary, tf),
            "frontière non alignée: {}",
            row.utc_boundary
        );
    }
    for pair in rows.windows(2) {
        assert_eq!(
            pair[0].utc_boundary,
            TimeGrid::advance(pair[1].utc_boundary, tf, 1).unwrap(),
            "séquence non contiguë entre {} et {}",
            pair[1].utc_boundary,
            pair[0].utc_boundary
        );
    }
}
