// SQLite persistence layer for the fine and roster ledger.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::protocol::UserId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("player {user_id} is already signed to {team}")]
    AlreadySigned { user_id: UserId, team: String },

    #[error("fine of ${amount} would overflow the balance of {user_id}")]
    BalanceOverflow { user_id: UserId, amount: u64 },

    #[error("ledger query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Largest balance SQLite can hold as an INTEGER.
pub const MAX_BALANCE: u64 = i64::MAX as u64;

/// One active contract on a team roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub user_id: UserId,
    pub team_name: String,
    pub manager_id: UserId,
    pub contract_duration: u8,
    pub signed_at: String,
}

/// Result of reducing a fine balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailOutcome {
    /// The user had nothing outstanding; nothing was written.
    NoFines,
    Reduced { previous: u64, remaining: u64 },
}

/// SQLite-backed store for fine balances and roster entries. Every write is
/// a single statement, committed immediately.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) a SQLite database at `path` and ensure both tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fines (
                user_id    INTEGER PRIMARY KEY,
                amount     INTEGER NOT NULL DEFAULT 0 CHECK (amount >= 0),
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rosters (
                user_id           INTEGER PRIMARY KEY,
                team_name         TEXT NOT NULL,
                manager_id        INTEGER NOT NULL,
                contract_duration INTEGER NOT NULL CHECK (contract_duration BETWEEN 1 AND 4),
                signed_at         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rosters_team_name ON rosters(team_name);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection. A poisoned lock still holds a usable
    /// connection since every write is a single statement.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run raw SQL against the ledger. Lets tests simulate storage faults.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn().execute_batch(sql)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fines
    // ------------------------------------------------------------------

    /// Add `amount` to the user's balance, creating the record on first fine.
    /// Returns the new balance. A sum above [`MAX_BALANCE`] is rejected with
    /// [`LedgerError::BalanceOverflow`] and nothing is written.
    pub fn add_fine(&self, user_id: UserId, amount: u64) -> Result<u64> {
        let conn = self.conn();
        let current: Option<u64> = conn
            .query_row(
                "SELECT amount FROM fines WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let balance = current
            .unwrap_or(0)
            .checked_add(amount)
            .filter(|&b| b <= MAX_BALANCE)
            .ok_or(LedgerError::BalanceOverflow { user_id, amount })?;

        conn.execute(
            "INSERT INTO fines (user_id, amount, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                amount     = excluded.amount,
                updated_at = excluded.updated_at",
            params![user_id, balance, now()],
        )?;
        Ok(balance)
    }

    /// Reduce the user's balance by `amount`, flooring at zero. Users with no
    /// record (or a zero balance) are left untouched.
    pub fn reduce_fine(&self, user_id: UserId, amount: u64) -> Result<BailOutcome> {
        let conn = self.conn();
        let previous: Option<u64> = conn
            .query_row(
                "SELECT amount FROM fines WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let previous = match previous {
            Some(balance) if balance > 0 => balance,
            _ => return Ok(BailOutcome::NoFines),
        };

        let remaining = previous.saturating_sub(amount);
        conn.execute(
            "UPDATE fines SET amount = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![remaining, now(), user_id],
        )?;
        Ok(BailOutcome::Reduced {
            previous,
            remaining,
        })
    }

    /// Outstanding balance for the user; zero if they were never fined.
    pub fn fine_balance(&self, user_id: UserId) -> Result<u64> {
        let conn = self.conn();
        let balance: Option<u64> = conn
            .query_row(
                "SELECT amount FROM fines WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance.unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Rosters
    // ------------------------------------------------------------------

    /// Distinct team names with at least one signed player, alphabetical.
    pub fn list_teams(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT team_name FROM rosters ORDER BY team_name")?;
        let teams = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(teams)
    }

    /// All roster entries for `team_name`, in signing order.
    pub fn list_roster_by_team(&self, team_name: &str) -> Result<Vec<RosterEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, team_name, manager_id, contract_duration, signed_at
             FROM rosters WHERE team_name = ?1 ORDER BY signed_at, user_id",
        )?;
        let entries = stmt
            .query_map(params![team_name], map_roster_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Manager recorded on the earliest signing for `team_name`.
    pub fn manager_of_team(&self, team_name: &str) -> Result<Option<UserId>> {
        let conn = self.conn();
        let manager = conn
            .query_row(
                "SELECT manager_id FROM rosters WHERE team_name = ?1
                 ORDER BY signed_at, user_id LIMIT 1",
                params![team_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(manager)
    }

    /// The user's active roster entry, if any.
    pub fn roster_entry(&self, user_id: UserId) -> Result<Option<RosterEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT user_id, team_name, manager_id, contract_duration, signed_at
                 FROM rosters WHERE user_id = ?1",
                params![user_id],
                map_roster_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Sign `user_id` to `team_name`. A player holds at most one active
    /// contract, so signing an already-rostered player fails with
    /// [`LedgerError::AlreadySigned`] and leaves the existing entry intact.
    pub fn sign_player(
        &self,
        user_id: UserId,
        team_name: &str,
        manager_id: UserId,
        seasons: u8,
    ) -> Result<()> {
        let conn = self.conn();
        let existing: Option<String> = conn
            .query_row(
                "SELECT team_name FROM rosters WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(team) = existing {
            return Err(LedgerError::AlreadySigned { user_id, team });
        }

        conn.execute(
            "INSERT INTO rosters (user_id, team_name, manager_id, contract_duration, signed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, team_name, manager_id, seasons, now()],
        )?;
        Ok(())
    }

    /// Remove every roster entry for `user_id`. Returns how many were removed.
    pub fn release_player(&self, user_id: UserId) -> Result<usize> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM rosters WHERE user_id = ?1", params![user_id])?;
        Ok(removed)
    }
}

fn map_roster_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RosterEntry> {
    Ok(RosterEntry {
        user_id: row.get(0)?,
        team_name: row.get(1)?,
        manager_id: row.get(2)?,
        contract_duration: row.get(3)?,
        signed_at: row.get(4)?,
    })
}

/// RFC 3339 UTC timestamp with sub-second precision, so signing order is
/// preserved when sorting as text.
fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
