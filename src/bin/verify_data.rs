// ============================================================================
// BINAIRE STANDALONE DE VÉRIFICATION DES DONNÉES
// ============================================================================
//
// Programme CLI indépendant pour vérifier l'intégrité des partitions
// stockées. Peut être exécuté séparément du programme principal:
// cargo run --bin verify_data -- --symbol KRW-BTC --timeframes 1m,5m

use anyhow::Result;
use clap::Parser;
use rusqlite::Connection;
use std::path::Path;
use upbit_candles_provider::timeframe::Timeframe;
use upbit_candles_provider::verify;

/// Arguments CLI pour le programme de vérification
#[derive(Parser, Debug)]
#[command(author, version, about = "Vérifier l'espacement des partitions de bougies", long_about = None)]
struct Args {
    /// Le marché à vérifier (ex: KRW-BTC)
    #[arg(short, long)]
    symbol: String,

    /// Les timeframes à vérifier, séparés par des virgules (par défaut: tous)
    #[arg(short, long, value_delimiter = ',')]
    timeframes: Option<Vec<String>>,

    /// Fichier de base de données
    #[arg(short = 'f', long, default_value = "upbit_candles.db")]
    db_file: String,
}

/// Point d'entrée du binaire de vérification
fn main() -> Result<()> {
    let args = Args::parse();

    let path = Path::new(&args.db_file);
    if !path.exists() {
        eprintln!(
            "Erreur: Le fichier de base de données '{}' n'existe pas",
            args.db_file
        );
        std::process::exit(1);
    }

    let conn = Connection::open(path)?;
    let symbol = args.symbol.to_uppercase();

    let timeframes: Vec<Timeframe> = match args.timeframes {
        Some(names) => {
            let mut parsed = Vec::new();
            for name in &names {
                match Timeframe::from_str_loose(name) {
                    Some(tf) => parsed.push(tf),
                    None => {
                        eprintln!("Timeframe inconnu ignoré: {name}");
                    }
                }
            }
            parsed
        }
        None => Timeframe::ALL.to_vec(),
    };

    println!("========================================");
    println!("VÉRIFICATION DE L'ESPACEMENT DES DONNÉES");
    println!("========================================");
    println!("Symbol: {symbol}");
    println!("Timeframes: {timeframes:?}");
    println!();

    let mut dirty = 0;
    for tf in &timeframes {
        match verify::verify_partition(&conn, &symbol, *tf) {
            Ok(report) if !report.is_clean() => dirty += 1,
            Ok(_) => {}
            Err(e) => eprintln!("Erreur lors de la vérification pour {tf}: {e}"),
        }
    }

    if dirty > 0 {
        eprintln!("⚠️  {dirty} partition(s) avec anomalies");
        std::process::exit(1);
    }

    Ok(())
}
