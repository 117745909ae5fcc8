//! # Hotspot Postgres
//!
//! `PostgreSQL` implementations of the ticket and purchase stores.
//!
//! The compare-and-set primitives are conditional updates
//! (`UPDATE ... WHERE id = $1 AND state = $2`): the database row lock makes
//! the swap atomic across service instances, and an empty update means the
//! caller lost the race, reported as `StaleState`/`StaleOutcome` after a
//! re-read. Queries are runtime-bound so no live database is needed at
//! compile time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotspot_core::error::StoreError;
use hotspot_core::store::{PurchaseStore, StateFields, TicketStore};
use hotspot_core::types::{
    Money, NewTicket, Purchase, PurchaseId, PurchaseOutcome, Ticket, TicketId, TicketState,
    TicketType, TicketTypeId, TicketTypeUpdate,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Column list shared by every ticket query.
const TICKET_COLUMNS: &str = "id, import_seq, username, password, type_id, state, \
     reserved_by, reserved_at, reservation_expires_at, sold_to, sold_at, comment";

/// Column list shared by every ticket type query.
const TYPE_COLUMNS: &str =
    "id, name, description, price_cents, profile, time_limit, data_limit, is_active, created_at";

/// Column list shared by every purchase query.
const PURCHASE_COLUMNS: &str = "id, type_id, buyer_ref, buyer_contact, payment_ref, ticket_id, \
     outcome, failure_reason, created_at, updated_at";

/// Connects a pool to the given database URL.
///
/// # Errors
///
/// Returns error if the connection cannot be established.
pub async fn connect(url: &str) -> Result<PgPool, StoreError> {
    PgPool::connect(url).await.map_err(backend)
}

/// Applies the embedded schema migrations.
///
/// # Errors
///
/// Returns error if a migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| StoreError::Backend(format!("migration failed: {err}")))
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|err| StoreError::Backend(format!("column {name}: {err}")))
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let state_name: String = col(row, "state")?;
    let state = TicketState::parse(&state_name)
        .ok_or_else(|| StoreError::Backend(format!("unknown ticket state {state_name:?}")))?;
    let import_seq: i64 = col(row, "import_seq")?;

    Ok(Ticket {
        id: TicketId::from_uuid(col(row, "id")?),
        import_seq: import_seq.unsigned_abs(),
        username: col(row, "username")?,
        password: col(row, "password")?,
        type_id: TicketTypeId::from_uuid(col(row, "type_id")?),
        state,
        reserved_by: col(row, "reserved_by")?,
        reserved_at: col(row, "reserved_at")?,
        reservation_expires_at: col(row, "reservation_expires_at")?,
        sold_to: col(row, "sold_to")?,
        sold_at: col(row, "sold_at")?,
        comment: col(row, "comment")?,
    })
}

fn type_from_row(row: &PgRow) -> Result<TicketType, StoreError> {
    let price_cents: i64 = col(row, "price_cents")?;

    Ok(TicketType {
        id: TicketTypeId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
        description: col(row, "description")?,
        price: Money::from_cents(price_cents.unsigned_abs()),
        profile: col(row, "profile")?,
        time_limit: col(row, "time_limit")?,
        data_limit: col(row, "data_limit")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<Purchase, StoreError> {
    let outcome_name: String = col(row, "outcome")?;
    let failure_reason: Option<String> = col(row, "failure_reason")?;
    let outcome = parse_outcome(&outcome_name, failure_reason)?;

    Ok(Purchase {
        id: PurchaseId::from_uuid(col(row, "id")?),
        type_id: TicketTypeId::from_uuid(col(row, "type_id")?),
        buyer_ref: col(row, "buyer_ref")?,
        buyer_contact: col(row, "buyer_contact")?,
        payment_ref: col(row, "payment_ref")?,
        ticket_id: col::<Option<Uuid>>(row, "ticket_id")?.map(TicketId::from_uuid),
        outcome,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn parse_outcome(name: &str, failure_reason: Option<String>) -> Result<PurchaseOutcome, StoreError> {
    match name {
        "pending" => Ok(PurchaseOutcome::Pending),
        "confirmed" => Ok(PurchaseOutcome::Confirmed),
        "failed" => Ok(PurchaseOutcome::Failed {
            reason: failure_reason.unwrap_or_default(),
        }),
        "expired" => Ok(PurchaseOutcome::Expired),
        other => Err(StoreError::Backend(format!(
            "unknown purchase outcome {other:?}"
        ))),
    }
}

fn outcome_columns(outcome: &PurchaseOutcome) -> (&'static str, Option<&String>) {
    match outcome {
        PurchaseOutcome::Pending => ("pending", None),
        PurchaseOutcome::Confirmed => ("confirmed", None),
        PurchaseOutcome::Failed { reason } => ("failed", Some(reason)),
        PurchaseOutcome::Expired => ("expired", None),
    }
}

/// `PostgreSQL`-backed [`TicketStore`].
#[derive(Clone)]
pub struct PgTicketStore {
    pool: Arc<PgPool>,
}

impl PgTicketStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match row {
            Some(row) => ticket_from_row(&row),
            None => Err(StoreError::TicketNotFound { id }),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE username = $1");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn list_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE type_id = $1 AND state = $2
             ORDER BY import_seq"
        );
        let rows = sqlx::query(&sql)
            .bind(type_id.as_uuid())
            .bind(state.as_str())
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(backend)?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn list_by_state(&self, state: TicketState) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE state = $1 ORDER BY import_seq"
        );
        let rows = sqlx::query(&sql)
            .bind(state.as_str())
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(backend)?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn count_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets WHERE type_id = $1 AND state = $2",
        )
        .bind(type_id.as_uuid())
        .bind(state.as_str())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(backend)?;

        Ok(count.unsigned_abs())
    }

    async fn compare_and_set_state(
        &self,
        id: TicketId,
        expected: TicketState,
        new: TicketState,
        fields: StateFields,
    ) -> Result<Ticket, StoreError> {
        let (reserved_by, reserved_at, expires_at, sold_to, sold_at) = match fields {
            StateFields::Reservation {
                reserved_by,
                reserved_at,
                expires_at,
            } => (
                Some(reserved_by),
                Some(reserved_at),
                Some(expires_at),
                None,
                None,
            ),
            StateFields::Sale { sold_to, sold_at } => {
                (None, None, None, Some(sold_to), Some(sold_at))
            }
            StateFields::Clear => (None, None, None, None, None),
        };

        let sql = format!(
            "UPDATE tickets
             SET state = $3,
                 reserved_by = $4,
                 reserved_at = $5,
                 reservation_expires_at = $6,
                 sold_to = $7,
                 sold_at = $8
             WHERE id = $1 AND state = $2
             RETURNING {TICKET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(expected.as_str())
            .bind(new.as_str())
            .bind(reserved_by)
            .bind(reserved_at)
            .bind(expires_at)
            .bind(sold_to)
            .bind(sold_at)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        if let Some(row) = row {
            return ticket_from_row(&row);
        }

        // Nothing updated: distinguish a lost race from a missing ticket.
        let actual: Option<String> = sqlx::query_scalar("SELECT state FROM tickets WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match actual {
            Some(name) => {
                let actual = TicketState::parse(&name)
                    .ok_or_else(|| StoreError::Backend(format!("unknown ticket state {name:?}")))?;
                Err(StoreError::StaleState {
                    id,
                    expected,
                    actual,
                })
            }
            None => Err(StoreError::TicketNotFound { id }),
        }
    }

    async fn bulk_insert(
        &self,
        tickets: Vec<NewTicket>,
    ) -> Result<Vec<Result<Ticket, StoreError>>, StoreError> {
        let mut results = Vec::with_capacity(tickets.len());

        for new_ticket in tickets {
            let sql = format!(
                "INSERT INTO tickets (id, username, password, type_id, state, comment)
                 VALUES ($1, $2, $3, $4, 'available', $5)
                 RETURNING {TICKET_COLUMNS}"
            );
            let inserted = sqlx::query(&sql)
                .bind(TicketId::new().as_uuid())
                .bind(&new_ticket.username)
                .bind(&new_ticket.password)
                .bind(new_ticket.type_id.as_uuid())
                .bind(&new_ticket.comment)
                .fetch_one(self.pool.as_ref())
                .await;

            match inserted {
                Ok(row) => results.push(ticket_from_row(&row)),
                Err(err) if is_unique_violation(&err) => {
                    results.push(Err(StoreError::DuplicateUsername {
                        username: new_ticket.username,
                    }));
                }
                Err(err) => return Err(backend(err)),
            }
        }

        Ok(results)
    }

    async fn get_type(&self, id: TicketTypeId) -> Result<TicketType, StoreError> {
        let sql = format!("SELECT {TYPE_COLUMNS} FROM ticket_types WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match row {
            Some(row) => type_from_row(&row),
            None => Err(StoreError::TypeNotFound { id }),
        }
    }

    async fn list_types(&self) -> Result<Vec<TicketType>, StoreError> {
        let sql = format!("SELECT {TYPE_COLUMNS} FROM ticket_types ORDER BY created_at, name");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(backend)?;

        rows.iter().map(type_from_row).collect()
    }

    async fn find_or_create_type(
        &self,
        profile: &str,
        time_limit: Option<&str>,
        data_limit: Option<&str>,
        default_price: Money,
    ) -> Result<TicketType, StoreError> {
        let select = format!(
            "SELECT {TYPE_COLUMNS} FROM ticket_types
             WHERE profile = $1
               AND time_limit IS NOT DISTINCT FROM $2
               AND data_limit IS NOT DISTINCT FROM $3"
        );

        if let Some(row) = sqlx::query(&select)
            .bind(profile)
            .bind(time_limit)
            .bind(data_limit)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?
        {
            return type_from_row(&row);
        }

        // Concurrent importers may race here; the unique index makes the
        // insert a no-op for the loser, who then reads the winner's row.
        sqlx::query(
            "INSERT INTO ticket_types
                 (id, name, description, price_cents, profile, time_limit, data_limit, is_active, created_at)
             VALUES ($1, $2, NULL, $3, $2, $4, $5, TRUE, $6)
             ON CONFLICT (profile, COALESCE(time_limit, ''), COALESCE(data_limit, ''))
             DO NOTHING",
        )
        .bind(TicketTypeId::new().as_uuid())
        .bind(profile)
        .bind(i64::try_from(default_price.cents()).unwrap_or(i64::MAX))
        .bind(time_limit)
        .bind(data_limit)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await
        .map_err(backend)?;

        let row = sqlx::query(&select)
            .bind(profile)
            .bind(time_limit)
            .bind(data_limit)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(backend)?;
        type_from_row(&row)
    }

    async fn update_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> Result<TicketType, StoreError> {
        let sql = format!(
            "UPDATE ticket_types
             SET name = COALESCE($2, name),
                 description = COALESCE($3, description),
                 price_cents = COALESCE($4, price_cents),
                 is_active = COALESCE($5, is_active)
             WHERE id = $1
             RETURNING {TYPE_COLUMNS}"
        );
        let price_cents = update
            .price
            .map(|price| i64::try_from(price.cents()).unwrap_or(i64::MAX));
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(update.name)
            .bind(update.description)
            .bind(price_cents)
            .bind(update.is_active)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match row {
            Some(row) => type_from_row(&row),
            None => Err(StoreError::TypeNotFound { id }),
        }
    }
}

/// `PostgreSQL`-backed [`PurchaseStore`].
#[derive(Clone)]
pub struct PgPurchaseStore {
    pool: Arc<PgPool>,
}

impl PgPurchaseStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PurchaseStore for PgPurchaseStore {
    async fn insert(&self, purchase: Purchase) -> Result<(), StoreError> {
        let (outcome, failure_reason) = outcome_columns(&purchase.outcome);
        sqlx::query(
            "INSERT INTO purchases
                 (id, type_id, buyer_ref, buyer_contact, payment_ref, ticket_id,
                  outcome, failure_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(purchase.id.as_uuid())
        .bind(purchase.type_id.as_uuid())
        .bind(&purchase.buyer_ref)
        .bind(&purchase.buyer_contact)
        .bind(&purchase.payment_ref)
        .bind(purchase.ticket_id.map(|id| *id.as_uuid()))
        .bind(outcome)
        .bind(failure_reason)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: PurchaseId) -> Result<Purchase, StoreError> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match row {
            Some(row) => purchase_from_row(&row),
            None => Err(StoreError::PurchaseNotFound { id }),
        }
    }

    async fn bind_ticket(&self, id: PurchaseId, ticket_id: TicketId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE purchases SET ticket_id = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(ticket_id.as_uuid())
            .execute(self.pool.as_ref())
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PurchaseNotFound { id });
        }
        Ok(())
    }

    async fn compare_and_set_outcome(
        &self,
        id: PurchaseId,
        expected: PurchaseOutcome,
        new: PurchaseOutcome,
        payment_ref: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Purchase, StoreError> {
        let (expected_name, _) = outcome_columns(&expected);
        let (new_name, failure_reason) = outcome_columns(&new);

        let sql = format!(
            "UPDATE purchases
             SET outcome = $3,
                 failure_reason = $4,
                 payment_ref = COALESCE($5, payment_ref),
                 updated_at = $6
             WHERE id = $1 AND outcome = $2
             RETURNING {PURCHASE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(expected_name)
            .bind(new_name)
            .bind(failure_reason)
            .bind(payment_ref)
            .bind(updated_at)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        if let Some(row) = row {
            return purchase_from_row(&row);
        }

        let actual = sqlx::query("SELECT outcome, failure_reason FROM purchases WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(backend)?;

        match actual {
            Some(row) => {
                let name: String = col(&row, "outcome")?;
                let failure_reason: Option<String> = col(&row, "failure_reason")?;
                Err(StoreError::StaleOutcome {
                    id,
                    expected,
                    actual: parse_outcome(&name, failure_reason)?,
                })
            }
            None => Err(StoreError::PurchaseNotFound { id }),
        }
    }

    async fn list_pending(&self) -> Result<Vec<Purchase>, StoreError> {
        let sql = format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE outcome = 'pending'
             ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(backend)?;

        rows.iter().map(purchase_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_names_round_trip() {
        for outcome in [
            PurchaseOutcome::Pending,
            PurchaseOutcome::Confirmed,
            PurchaseOutcome::Failed {
                reason: "declined".to_string(),
            },
            PurchaseOutcome::Expired,
        ] {
            let (name, reason) = outcome_columns(&outcome);
            let parsed = parse_outcome(name, reason.cloned());
            assert_eq!(parsed.ok().as_ref(), Some(&outcome));
        }
    }
}
