/// Module de gestion de la base de données SQLite
///
/// Ce module fournit une structure DatabaseManager pour encapsuler
/// toutes les opérations liées à la base de données
use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

/// Schéma de la table des bougies
///
/// La clé primaire `(symbol, timeframe, utc_boundary)` matérialise la
/// partition: une ligne par frontière alignée et par partition, et permet
/// l'idempotence via INSERT OR IGNORE. Les lignes ne sont jamais mises à
/// jour: une bougie d'exchange est un fait historique.
pub const SQL_CREATE_TABLE_CANDLES: &str = "CREATE TABLE IF NOT EXISTS candles (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    utc_boundary INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume_base REAL NOT NULL,
    volume_quote REAL NOT NULL,
    trade_count INTEGER,
    source_tag INTEGER NOT NULL DEFAULT 0,
    copy_source_utc INTEGER,
    PRIMARY KEY (symbol, timeframe, utc_boundary)
)";

/// Schéma de la table de statut des partitions (monitoring et reprise)
pub const SQL_CREATE_TABLE_PARTITION_STATUS: &str = "CREATE TABLE IF NOT EXISTS partition_status (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    oldest_boundary INTEGER,
    reached_upstream_end INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    PRIMARY KEY (symbol, timeframe)
)";

/// Gestionnaire de la base de données SQLite
///
/// ARCHITECTURE:
/// Cette structure encapsule la connexion SQLite et fournit des méthodes
/// pour initialiser le schéma et gérer la connexion. Chaque tâche de
/// collecte ouvre sa propre connexion: SQLite en mode WAL sérialise les
/// écrivains et laisse les lecteurs concurrents.
pub struct DatabaseManager {
    conn: Connection,
}

impl DatabaseManager {
    /// Crée et initialise une nouvelle connexion à la base de données
    pub fn new(db_file: &str) -> Result<Self> {
        let path = Path::new(db_file);
        let conn = Connection::open(path)?;

        // journal_mode retourne une ligne ("wal"), d'où query_row
        conn.query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Self::init_schema(&conn)?;

        Ok(DatabaseManager { conn })
    }

    /// Connexion en mémoire, pour les tests
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(DatabaseManager { conn })
    }

    /// Initialise le schéma de la base de données
    ///
    /// DESIGN: Méthode privée, appelée uniquement depuis les constructeurs
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(SQL_CREATE_TABLE_CANDLES, [])?;
        conn.execute(SQL_CREATE_TABLE_PARTITION_STATUS, [])?;
        Ok(())
    }

    /// Retourne une référence à la connexion SQLite
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Retourne une référence mutable à la connexion SQLite
    /// (nécessaire pour les transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
