/// Bibliothèque principale du provider de bougies Upbit
///
/// Cette bibliothèque expose tous les modules nécessaires pour récupérer,
/// réconcilier, densifier et servir des séries de chandeliers depuis Upbit
// Déclaration des modules publics
pub mod candle;
pub mod chunk;
pub mod collection;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod exchange;
pub mod gap_filler;
pub mod overlap;
pub mod processor;
pub mod provider;
pub mod replay;
pub mod repository;
pub mod request;
pub mod time_grid;
pub mod timeframe;
pub mod utils;
pub mod verify;

pub use candle::{AlignedRange, Candle, SourceTag};
pub use coordinator::CancelFlag;
pub use error::{ProviderError, Result};
pub use exchange::{CHUNK_MAX, ExchangeClient, UpbitClient};
pub use provider::CandleProvider;
pub use request::CandleRequest;
pub use timeframe::Timeframe;
