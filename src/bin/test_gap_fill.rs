/// Programme de démonstration de la densification par EmptyCopy
///
/// Simule un marché peu liquide: l'exchange de rejeu ne connaît que
/// quelques bougies éparses, et la collecte (chunks de 4) doit produire
/// une séquence dense, trous intra-chunk et inter-chunks compris.
use anyhow::Result;
use std::sync::Arc;
use upbit_candles_provider::candle::{Candle, SourceTag};
use upbit_candles_provider::database::DatabaseManager;
use upbit_candles_provider::provider::CandleProvider;
use upbit_candles_provider::replay::ReplayExchange;
use upbit_candles_provider::request::CandleRequest;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::utils::format_timestamp_ms;
use upbit_candles_provider::verify;

const MIN: i64 = 60_000;
// 2025-09-09T00:00:00Z
const BASE: i64 = 1_757_376_000_000;

fn real(minute: i64, close: f64) -> Candle {
    Candle {
        utc_boundary: BASE + minute * MIN,
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

#[tokio::main]
async fn main() -> Result<()> {
    let db_file = "test_gaps.db";

    // Supprimer l'ancienne base de test
    let _ = std::fs::remove_file(db_file);

    println!("=== TEST DE DENSIFICATION PAR EMPTY_COPY ===\n");

    // Bougies éparses: trous intentionnels aux minutes 41, 44-45 et 47
    println!("Marché simulé: trades aux minutes 38, 39, 40, 42, 43, 46, 48, 49");
    let mut exchange = ReplayExchange::new();
    exchange.load(
        "KRW-TEST",
        Timeframe::M1,
        vec![
            real(38, 100.0),
            real(39, 101.0),
            real(40, 102.0),
            real(42, 104.0),
            real(43, 105.0),
            real(46, 108.0),
            real(48, 110.0),
            real(49, 111.0),
        ],
    );

    // Chunks de 4: le trou 44-45 chevauche une frontière de chunk
    let provider = CandleProvider::new(db_file, Arc::new(exchange)).with_chunk_max(4);
    let request = CandleRequest::new("KRW-TEST", Timeframe::M1)
        .with_count(12)
        .with_to_ms(BASE + 50 * MIN);

    println!(
        "Requête: 12 bougies jusqu'à {}\n",
        format_timestamp_ms(BASE + 50 * MIN)
    );

    let candles = provider.get_candles(&request).await?;

    println!("=== SÉQUENCE RETOURNÉE ===");
    println!("Timestamp           | Close   | Source");
    println!("--------------------|---------|----------");
    for candle in &candles {
        let tag = match candle.source_tag {
            SourceTag::Real => "réelle",
            SourceTag::EmptyCopy => "EmptyCopy",
        };
        println!(
            "{} | {:7.1} | {}",
            format_timestamp_ms(candle.utc_boundary),
            candle.close,
            tag
        );
    }

    let empties = candles.iter().filter(|c| !c.is_real()).count();
    println!(
        "\nTotal: {} bougies, {} réelles, {} synthétiques",
        candles.len(),
        candles.len() - empties,
        empties
    );

    // La partition persistée doit être continue
    let db = DatabaseManager::new(db_file)?;
    let report = verify::verify_partition(db.connection(), "KRW-TEST", Timeframe::M1)?;
    if report.is_clean() {
        println!("✓ Test terminé! Base de données: {db_file}");
        println!("  Vous pouvez inspecter la base avec: sqlite3 {db_file}");
    } else {
        eprintln!("✗ Anomalies détectées dans la partition");
        std::process::exit(1);
    }

    Ok(())
}
