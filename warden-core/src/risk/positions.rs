//! Open-position book
//!
//! Positions are kept per entry (no netting across fills) so a closing fill
//! realizes PnL against the oldest opposite entries first.

use crate::core::{Side, TickEvent};

/// Fills smaller than this are treated as fully consumed
const VOLUME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    /// Last mark: bid for longs, ask for shorts
    pub mark_price: f64,
}

impl OpenPosition {
    #[inline]
    pub fn unrealized(&self, contract_size: f64) -> f64 {
        (self.mark_price - self.entry_price) * self.volume * contract_size * self.side.direction()
    }

    #[inline]
    pub fn notional(&self, contract_size: f64) -> f64 {
        self.volume * contract_size * self.mark_price.abs()
    }
}

/// Result of applying one fill to the book
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillOutcome {
    /// PnL realized by closing opposite entries
    pub realized_pnl: f64,
    /// Volume that closed existing entries
    pub closed_volume: f64,
    /// Volume left over that opened a new entry
    pub opened_volume: f64,
}

impl FillOutcome {
    pub fn closed_any(&self) -> bool {
        self.closed_volume > VOLUME_EPSILON
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: Vec<OpenPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[OpenPosition] {
        &self.positions
    }

    /// Re-mark every position on the tick's symbol
    pub fn mark(&mut self, tick: &TickEvent) {
        for position in self.positions.iter_mut().filter(|p| p.symbol == tick.symbol) {
            position.mark_price = tick.mark_for(position.side);
        }
    }

    pub fn unrealized_pnl(&self, contract_size: f64) -> f64 {
        self.positions.iter().map(|p| p.unrealized(contract_size)).sum()
    }

    pub fn exposure(&self, contract_size: f64) -> f64 {
        self.positions.iter().map(|p| p.notional(contract_size)).sum()
    }

    /// Apply a fill: close opposite entries on the same symbol oldest first,
    /// open a new entry with whatever volume remains.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: Side,
        volume: f64,
        price: f64,
        contract_size: f64,
    ) -> FillOutcome {
        let mut outcome = FillOutcome::default();
        let mut remaining = volume;
        let closing = side.opposite();

        for position in self
            .positions
            .iter_mut()
            .filter(|p| p.symbol == symbol && p.side == closing)
        {
            if remaining <= VOLUME_EPSILON {
                break;
            }
            let closed = remaining.min(position.volume);
            outcome.realized_pnl +=
                (price - position.entry_price) * closed * contract_size * position.side.direction();
            outcome.closed_volume += closed;
            position.volume -= closed;
            remaining -= closed;
        }
        self.positions.retain(|p| p.volume > VOLUME_EPSILON);

        if remaining > VOLUME_EPSILON {
            outcome.opened_volume = remaining;
            self.positions.push(OpenPosition {
                symbol: symbol.to_string(),
                side,
                volume: remaining,
                entry_price: price,
                mark_price: price,
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_open_and_mark_long() {
        let mut book = PositionBook::new();
        book.apply_fill("EURUSD", Side::Buy, 1.0, 1.1000, 100_000.0);
        book.mark(&TickEvent::new("EURUSD", 1.0990, 1.0992));

        assert_eq!(book.len(), 1);
        assert_relative_eq!(book.unrealized_pnl(100_000.0), -100.0, epsilon = 1e-6);
        assert_relative_eq!(book.exposure(100_000.0), 109_900.0, epsilon = 1e-6);
    }

    #[test]
    fn test_short_marked_at_ask() {
        let mut book = PositionBook::new();
        book.apply_fill("XAUUSD", Side::Sell, 2.0, 2000.0, 1.0);
        book.mark(&TickEvent::new("XAUUSD", 1989.0, 1990.0));

        // (1990 - 2000) * 2 * -1
        assert_relative_eq!(book.unrealized_pnl(1.0), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mark_ignores_other_symbols() {
        let mut book = PositionBook::new();
        book.apply_fill("EURUSD", Side::Buy, 1.0, 1.1, 1.0);
        book.mark(&TickEvent::new("GBPUSD", 1.3, 1.3));
        assert_eq!(book.positions()[0].mark_price, 1.1);
    }

    #[test]
    fn test_close_fifo_with_remainder() {
        let mut book = PositionBook::new();
        book.apply_fill("EURUSD", Side::Buy, 1.0, 1.10, 1.0);
        book.apply_fill("EURUSD", Side::Buy, 1.0, 1.20, 1.0);

        let outcome = book.apply_fill("EURUSD", Side::Sell, 1.5, 1.15, 1.0);
        // first lot +0.05, half of second lot -0.025
        assert_relative_eq!(outcome.realized_pnl, 0.025, epsilon = 1e-12);
        assert_relative_eq!(outcome.closed_volume, 1.5, epsilon = 1e-12);
        assert_eq!(outcome.opened_volume, 0.0);
        assert_eq!(book.len(), 1);
        assert_relative_eq!(book.positions()[0].volume, 0.5, epsilon = 1e-12);
        assert_eq!(book.positions()[0].entry_price, 1.20);

        let flip = book.apply_fill("EURUSD", Side::Sell, 1.0, 1.25, 1.0);
        assert!(flip.closed_any());
        assert_relative_eq!(flip.opened_volume, 0.5, epsilon = 1e-12);
        assert_eq!(book.positions()[0].side, Side::Sell);
    }
}
