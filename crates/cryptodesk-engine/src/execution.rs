use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use cryptodesk_models::trade_decision::{ExecutionReceipt, OrderRequest, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const BPS: i64 = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Network failure, timeout, or venue overload. Safe to resubmit with the
    /// same client order id.
    #[error("Transient venue error: {0}")]
    Transient(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Venue authentication failed: {0}")]
    Auth(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}

/// Venue that fills simulated orders.
///
/// Implementations must be idempotent on `client_order_id`: a resubmission
/// returns the original receipt instead of a second fill.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    fn venue(&self) -> &str;

    async fn submit(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExecutionError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveKind {
    StopLoss,
    TakeProfit,
}

/// A resting stop-loss or take-profit attached to a filled order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestingOrder {
    pub client_order_id: String,
    pub parent_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub trigger_price: Decimal,
    pub kind: ProtectiveKind,
}

#[derive(Debug, Default)]
struct Book {
    fills: HashMap<String, ExecutionReceipt>,
    resting: Vec<RestingOrder>,
}

/// In-process venue. Fills every order at the reference price adjusted by a
/// fixed slippage, against the taker.
#[derive(Debug)]
pub struct PaperExchange {
    slippage_bps: u32,
    next_id: AtomicU64,
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new(slippage_bps: u32) -> Self {
        Self {
            slippage_bps,
            next_id: AtomicU64::new(1),
            book: Mutex::new(Book::default()),
        }
    }

    /// Fill price for `side` at `reference`.
    pub fn fill_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        let slip = reference * Decimal::from(self.slippage_bps) / Decimal::from(BPS);
        let price = match side {
            OrderSide::Buy => reference + slip,
            OrderSide::Sell => reference - slip,
        };
        price.round_dp(8).normalize()
    }

    /// Resting protective orders, oldest first.
    pub fn open_orders(&self) -> Vec<RestingOrder> {
        self.lock().resting.clone()
    }

    /// Cancel a resting order. Returns false if no such order is resting.
    pub fn cancel(&self, client_order_id: &str) -> bool {
        let mut book = self.lock();
        let before = book.resting.len();
        book.resting.retain(|o| o.client_order_id != client_order_id);
        let cancelled = book.resting.len() < before;
        if cancelled {
            info!(client_order_id, "Resting order cancelled");
        }
        cancelled
    }

    /// Number of distinct orders filled.
    pub fn fill_count(&self) -> usize {
        self.lock().fills.len()
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TradeExecutor for PaperExchange {
    fn venue(&self) -> &str {
        "paper"
    }

    async fn submit(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExecutionError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if order.price <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "reference price must be positive, got {}",
                order.price
            )));
        }

        let mut book = self.lock();
        if let Some(existing) = book.fills.get(&order.client_order_id) {
            info!(
                client_order_id = %order.client_order_id,
                "Duplicate submission, returning original fill"
            );
            return Ok(existing.clone());
        }

        let receipt = ExecutionReceipt {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: format!("paper-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            fill_price: self.fill_price(order.side, order.price),
            executed_at: Utc::now(),
            venue: self.venue().to_string(),
        };

        // A fill on the symbol supersedes protection placed by earlier orders.
        book.resting.retain(|o| o.symbol != order.symbol);
        let protective = [
            (ProtectiveKind::StopLoss, order.stop_loss, "sl"),
            (ProtectiveKind::TakeProfit, order.take_profit, "tp"),
        ];
        for (kind, trigger, suffix) in protective {
            if let Some(trigger_price) = trigger {
                book.resting.push(RestingOrder {
                    client_order_id: format!("{}-{suffix}", order.client_order_id),
                    parent_order_id: order.client_order_id.clone(),
                    symbol: order.symbol.clone(),
                    side: order.side.opposite(),
                    quantity: order.quantity,
                    trigger_price,
                    kind,
                });
            }
        }

        info!(
            client_order_id = %receipt.client_order_id,
            symbol = %receipt.symbol,
            side = %receipt.side,
            quantity = %receipt.quantity,
            fill_price = %receipt.fill_price,
            "Paper order filled"
        );
        book.fills
            .insert(order.client_order_id.clone(), receipt.clone());
        Ok(receipt)
    }
}
