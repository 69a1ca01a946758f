// ============================================================================
// CLI DU PROVIDER DE BOUGIES UPBIT
// ============================================================================

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use upbit_candles_provider::collection::ProgressCallback;
use upbit_candles_provider::provider::CandleProvider;
use upbit_candles_provider::request::CandleRequest;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::utils::format_timestamp_ms;
use upbit_candles_provider::{UpbitClient, verify};

const DB_FILE: &str = "upbit_candles.db";

/// Récupère des séquences denses de bougies depuis Upbit
///
/// Exactement une des quatre combinaisons doit être fournie:
/// --count | --count --to | --to --end | --end
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Le marché à récupérer (ex: KRW-BTC)
    #[arg(short, long)]
    symbol: String,

    /// Timeframe: 1s, 1m, 3m, 5m, 10m, 15m, 30m, 1h, 4h, 1d, 1w, 1M
    #[arg(short, long, default_value = "1m")]
    timeframe: String,

    /// Nombre de bougies à récupérer
    #[arg(short, long)]
    count: Option<i64>,

    /// Borne récente (RFC3339, "YYYY-MM-DD HH:MM:SS" ou "YYYY-MM-DD")
    #[arg(long)]
    to: Option<String>,

    /// Borne ancienne, mêmes formats que --to
    #[arg(short, long)]
    end: Option<String>,

    /// Fichier de base de données
    #[arg(long, default_value = DB_FILE)]
    db_file: String,

    /// Vérifier l'espacement de la partition après la récupération
    #[arg(short = 'v', long)]
    verify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let timeframe = Timeframe::from_str_loose(&args.timeframe)
        .ok_or_else(|| anyhow::anyhow!("timeframe inconnu: {}", args.timeframe))?;

    let mut request = CandleRequest::new(&args.symbol, timeframe);
    if let Some(count) = args.count {
        request = request.with_count(count);
    }
    if let Some(to) = &args.to {
        request = request.with_to_date(to)?;
    }
    if let Some(end) = &args.end {
        request = request.with_end_date(end)?;
    }

    println!(
        "Démarrage de la récupération pour le marché: {}",
        request.symbol
    );

    let provider = CandleProvider::new(&args.db_file, Arc::new(UpbitClient::new()));
    println!("Base de données: {}", args.db_file);

    let progress: ProgressCallback = Box::new(|snapshot| {
        println!(
            "  ✓ chunk #{} : {}/{} bougies ({} chunks estimés, {:.1?} écoulées)",
            snapshot.chunk_index,
            snapshot.collected,
            snapshot.requested,
            snapshot.total_chunks_estimate,
            snapshot.elapsed
        );
    });

    let symbol = request.symbol.clone();
    match provider.get_candles_with(&request, Some(progress), None).await {
        Ok(candles) => {
            let real = candles.iter().filter(|c| c.is_real()).count();
            println!(
                "Terminé pour {}/{}. {} bougies retournées ({} réelles, {} synthétiques).",
                symbol,
                timeframe,
                candles.len(),
                real,
                candles.len() - real
            );
            if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
                println!(
                    "Plage: {} → {}",
                    format_timestamp_ms(first.utc_boundary),
                    format_timestamp_ms(last.utc_boundary)
                );
            }
        }
        Err(e) => {
            eprintln!("Erreur lors de la récupération pour {symbol}: {e}");
            std::process::exit(1);
        }
    }

    if args.verify {
        println!("\n========================================");
        println!("VÉRIFICATION DE L'ESPACEMENT DES DONNÉES");
        println!("========================================");

        let db = upbit_candles_provider::database::DatabaseManager::new(&args.db_file)?;
        if let Err(e) = verify::verify_partition(db.connection(), &symbol, timeframe) {
            eprintln!("Erreur lors de la vérification pour {timeframe}: {e}");
        }
    }

    println!("Toutes les opérations sont terminées.");

    Ok(())
}
