use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use common::{CloseReason, OrderSide, OrderStatus, Result};

/// Embedded schema migrations, shared by the binary and the tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// A new order to be mirrored into the ledger right after submission.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub entry: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
    pub risk_reward: f64,
    pub comment: String,
    /// Full pattern/FVG context captured at submission time.
    pub extra: serde_json::Value,
}

/// One ledger row.
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    #[sqlx(rename = "Ticket")]
    pub ticket: i64,
    #[sqlx(rename = "Symbol")]
    pub symbol: String,
    #[sqlx(rename = "Side")]
    pub side: OrderSide,
    #[sqlx(rename = "Entry")]
    pub entry: f64,
    #[sqlx(rename = "Volume")]
    pub volume: f64,
    #[sqlx(rename = "StopLoss")]
    pub stop_loss: f64,
    #[sqlx(rename = "TakeProfit")]
    pub take_profit: f64,
    #[sqlx(rename = "Strategy")]
    pub strategy: String,
    #[sqlx(rename = "RiskReward")]
    pub risk_reward: f64,
    #[sqlx(rename = "Status")]
    pub status: OrderStatus,
    #[sqlx(rename = "CloseReason")]
    pub close_reason: Option<CloseReason>,
    #[sqlx(rename = "ClosePrice")]
    pub close_price: Option<f64>,
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "ClosedAt")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Durable log of submitted orders, reconciled against the broker each
/// cycle. The broker stays the source of truth for live state; writes here
/// are auto-committed and failures must never abort the caller's cycle.
#[derive(Clone)]
pub struct OrderLedger {
    pool: SqlitePool,
}

impl OrderLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and migrate. Used by the binary and by integration tests.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        info!(url, "Ledger ready");
        Ok(Self { pool })
    }

    /// Insert an open order. Idempotent on Ticket: replaying a submission
    /// leaves the existing row untouched.
    pub async fn insert_open(&self, order: &NewOrder, created_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO Orders (
                Ticket, Symbol, Side, Entry, Volume, StopLoss, TakeProfit,
                Strategy, RiskReward, Status, Comment, ExtraJson, CreatedAt
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'OPEN', ?10, ?11, ?12)
            ON CONFLICT(Ticket) DO NOTHING
            "#,
        )
        .bind(order.ticket as i64)
        .bind(&order.symbol)
        .bind(order.side)
        .bind(order.entry)
        .bind(order.volume)
        .bind(order.stop_loss)
        .bind(order.take_profit)
        .bind(&order.strategy)
        .bind(order.risk_reward)
        .bind(&order.comment)
        .bind(order.extra.to_string())
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip an order to Closed. Only rows still Open are touched, so the
    /// Open→Closed transition happens exactly once per ticket. Returns
    /// whether a row was flipped.
    pub async fn mark_closed(
        &self,
        ticket: u64,
        close_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE Orders
            SET Status = 'CLOSED', CloseReason = ?2, ClosePrice = ?3, ClosedAt = ?4
            WHERE Ticket = ?1 AND Status = 'OPEN'
            "#,
        )
        .bind(ticket as i64)
        .bind(reason)
        .bind(close_price)
        .bind(closed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_open(&self) -> Result<Vec<OrderRow>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM Orders WHERE Status = 'OPEN' ORDER BY CreatedAt ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, ticket: u64) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM Orders WHERE Ticket = ?1")
            .bind(ticket as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Orders created since `day_start`, optionally for one strategy.
    pub async fn count_today(
        &self,
        day_start: DateTime<Utc>,
        strategy: Option<&str>,
    ) -> Result<u32> {
        let count: i64 = match strategy {
            Some(strategy) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM Orders WHERE CreatedAt >= ?1 AND Strategy = ?2",
                )
                .bind(day_start)
                .bind(strategy)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM Orders WHERE CreatedAt >= ?1")
                    .bind(day_start)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u32)
    }

    /// Whether the first order closed since `day_start` went out on
    /// take-profit. Drives the close-day-on-first-TP policy.
    pub async fn first_tp_today(
        &self,
        day_start: DateTime<Utc>,
        strategy: Option<&str>,
    ) -> Result<bool> {
        let reason: Option<CloseReason> = match strategy {
            Some(strategy) => {
                sqlx::query_scalar(
                    r#"
                    SELECT CloseReason FROM Orders
                    WHERE CreatedAt >= ?1 AND Status = 'CLOSED' AND Strategy = ?2
                    ORDER BY ClosedAt ASC LIMIT 1
                    "#,
                )
                .bind(day_start)
                .bind(strategy)
                .fetch_optional(&self.pool)
                .await?
                .flatten()
            }
            None => sqlx::query_scalar(
                r#"
                SELECT CloseReason FROM Orders
                WHERE CreatedAt >= ?1 AND Status = 'CLOSED'
                ORDER BY ClosedAt ASC LIMIT 1
                "#,
            )
            .bind(day_start)
            .fetch_optional(&self.pool)
            .await?
            .flatten(),
        };
        Ok(reason == Some(CloseReason::Tp))
    }

    /// Auxiliary structured log row (trailing-stop moves, closures, aborts).
    pub async fn log(
        &self,
        level: &str,
        logger: &str,
        message: &str,
        symbol: Option<&str>,
        strategy: Option<&str>,
        extra: Option<serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO Logs (Level, LoggerName, Message, Symbol, Strategy, ExtraJson, CreatedAt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(level)
        .bind(logger)
        .bind(message)
        .bind(symbol)
        .bind(strategy)
        .bind(extra.map(|v| v.to_string()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn ledger() -> OrderLedger {
        OrderLedger::connect("sqlite::memory:").await.unwrap()
    }

    fn order(ticket: u64, strategy: &str) -> NewOrder {
        NewOrder {
            ticket,
            symbol: "EURUSD".into(),
            side: OrderSide::Sell,
            entry: 1.0984,
            volume: 0.10,
            stop_loss: 1.0995,
            take_profit: 1.0950,
            strategy: strategy.into(),
            risk_reward: 3.1,
            comment: "test".into(),
            extra: serde_json::json!({"pattern": "turtle_soup"}),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_ticket() {
        let ledger = ledger().await;
        ledger.insert_open(&order(1, "turtle_soup_fvg"), at(14, 0)).await.unwrap();
        ledger.insert_open(&order(1, "turtle_soup_fvg"), at(15, 0)).await.unwrap();

        let open = ledger.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].created_at, at(14, 0));
    }

    #[tokio::test]
    async fn open_closes_exactly_once() {
        let ledger = ledger().await;
        ledger.insert_open(&order(7, "crt_revision"), at(14, 0)).await.unwrap();

        let first = ledger
            .mark_closed(7, 1.0950, CloseReason::Tp, at(16, 0))
            .await
            .unwrap();
        let second = ledger
            .mark_closed(7, 1.0900, CloseReason::Manual, at(17, 0))
            .await
            .unwrap();
        assert!(first);
        assert!(!second, "a closed row must not be closed again");

        let row = ledger.get(7).await.unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Closed);
        assert_eq!(row.close_reason, Some(CloseReason::Tp));
        assert_eq!(row.closed_at, Some(at(16, 0)));
        assert!(row.closed_at.unwrap() >= row.created_at);
    }

    #[tokio::test]
    async fn count_today_filters_by_day_start_and_strategy() {
        let ledger = ledger().await;
        ledger.insert_open(&order(1, "turtle_soup_fvg"), at(9, 0)).await.unwrap();
        ledger.insert_open(&order(2, "turtle_soup_fvg"), at(11, 0)).await.unwrap();
        ledger.insert_open(&order(3, "crt_extreme"), at(12, 0)).await.unwrap();

        assert_eq!(ledger.count_today(at(10, 0), None).await.unwrap(), 2);
        assert_eq!(
            ledger
                .count_today(at(0, 0), Some("turtle_soup_fvg"))
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            ledger.count_today(at(0, 0), Some("crt_extreme")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn first_tp_today_looks_at_earliest_close() {
        let ledger = ledger().await;
        ledger.insert_open(&order(1, "crt_revision"), at(9, 0)).await.unwrap();
        ledger.insert_open(&order(2, "crt_revision"), at(10, 0)).await.unwrap();

        ledger.mark_closed(2, 1.0900, CloseReason::Sl, at(11, 0)).await.unwrap();
        ledger.mark_closed(1, 1.0950, CloseReason::Tp, at(12, 0)).await.unwrap();

        // Earliest close of the day was the SL at 11:00.
        assert!(!ledger.first_tp_today(at(0, 0), None).await.unwrap());
    }

    #[tokio::test]
    async fn first_tp_today_true_when_tp_closed_first() {
        let ledger = ledger().await;
        ledger.insert_open(&order(1, "crt_revision"), at(9, 0)).await.unwrap();
        ledger.mark_closed(1, 1.0950, CloseReason::Tp, at(11, 0)).await.unwrap();
        assert!(ledger.first_tp_today(at(0, 0), None).await.unwrap());
        assert!(ledger
            .first_tp_today(at(0, 0), Some("crt_revision"))
            .await
            .unwrap());
        assert!(!ledger
            .first_tp_today(at(0, 0), Some("turtle_soup_fvg"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn log_rows_persist() {
        let ledger = ledger().await;
        ledger
            .log(
                "INFO",
                "monitor",
                "trailing stop advanced",
                Some("EURUSD"),
                None,
                Some(serde_json::json!({"old_sl": 1.0, "new_sl": 1.1})),
            )
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Logs")
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
