//! Batch import of pre-generated tickets.
//!
//! Rows come from an external generator export (username, password,
//! profile, limits, comment). Each row is validated independently: one bad
//! row never aborts the batch, it just lands in the report with its 1-based
//! row number. Duplicate usernames are rejected by the store rather than
//! overwritten, so re-importing a batch can never double-count inventory.

use crate::error::StoreError;
use crate::store::TicketStore;
use crate::types::{ImportReport, ImportRow, Money, NewTicket, TicketTypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Key identifying a ticket type triple within one batch.
type TypeKey = (String, Option<String>, Option<String>);

/// Translates uploaded batches into ticket store rows.
pub struct TicketImporter {
    store: Arc<dyn TicketStore>,
    default_price: Money,
}

impl TicketImporter {
    /// Creates an importer. `default_price` is assigned to ticket types the
    /// batch auto-creates.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, default_price: Money) -> Self {
        Self {
            store,
            default_price,
        }
    }

    /// Imports a batch of raw rows.
    ///
    /// Returns the per-batch report; row-level failures are collected in
    /// [`ImportReport::errors`], never propagated.
    ///
    /// # Errors
    ///
    /// Returns error only if the store backend fails as a whole.
    pub async fn import(&self, rows: Vec<ImportRow>) -> Result<ImportReport, StoreError> {
        let mut failures: Vec<(usize, String)> = Vec::new();
        let mut accepted: Vec<usize> = Vec::new();
        let mut tickets: Vec<NewTicket> = Vec::new();
        let mut type_cache: HashMap<TypeKey, TicketTypeId> = HashMap::new();

        for (index, row) in rows.into_iter().enumerate() {
            let line = index + 1;
            match self.prepare_row(&row, &mut type_cache).await {
                Ok(ticket) => {
                    accepted.push(line);
                    tickets.push(ticket);
                }
                Err(RowError::Invalid(reason)) => failures.push((line, reason)),
                Err(RowError::Store(err)) => return Err(err),
            }
        }

        let results = self.store.bulk_insert(tickets).await?;
        let mut imported = 0;
        for (line, result) in accepted.into_iter().zip(results) {
            match result {
                Ok(_) => imported += 1,
                Err(err) => failures.push((line, err.to_string())),
            }
        }

        failures.sort_by_key(|(line, _)| *line);
        let report = ImportReport {
            imported,
            failed: failures.len(),
            errors: failures
                .into_iter()
                .map(|(line, reason)| format!("row {line}: {reason}"))
                .collect(),
        };

        tracing::info!(
            imported = report.imported,
            failed = report.failed,
            "ticket batch imported"
        );
        Ok(report)
    }

    /// Validates one row and resolves its ticket type.
    async fn prepare_row(
        &self,
        row: &ImportRow,
        type_cache: &mut HashMap<TypeKey, TicketTypeId>,
    ) -> Result<NewTicket, RowError> {
        let username = row.username.trim();
        if username.is_empty() {
            return Err(RowError::Invalid("username is empty".to_string()));
        }
        let password = row.password.trim();
        if password.is_empty() {
            return Err(RowError::Invalid("password is empty".to_string()));
        }
        let profile = row.profile.trim();
        if profile.is_empty() {
            return Err(RowError::Invalid("profile is empty".to_string()));
        }

        let time_limit = normalize(row.time_limit.as_deref());
        let data_limit = normalize(row.data_limit.as_deref());

        let key: TypeKey = (
            profile.to_string(),
            time_limit.map(str::to_string),
            data_limit.map(str::to_string),
        );
        let type_id = match type_cache.get(&key) {
            Some(id) => *id,
            None => {
                let ticket_type = self
                    .store
                    .find_or_create_type(profile, time_limit, data_limit, self.default_price)
                    .await
                    .map_err(RowError::Store)?;
                if ticket_type.price.is_zero() {
                    tracing::warn!(
                        profile,
                        type_id = %ticket_type.id,
                        "ticket type has zero price; tickets of this type sell for free"
                    );
                }
                type_cache.insert(key, ticket_type.id);
                ticket_type.id
            }
        };

        Ok(NewTicket {
            username: username.to_string(),
            password: password.to_string(),
            type_id,
            comment: normalize(row.comment.as_deref()).map(str::to_string),
        })
    }
}

/// Trims a raw optional cell, mapping empty to `None`.
fn normalize(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

enum RowError {
    Invalid(String),
    Store(StoreError),
}
