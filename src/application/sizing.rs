//! Position sizing: fixed-percent and Kelly-criterion modes, grounded on
//! `original_source/.../live_trading_service.py::_calculate_position_size`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub default_position_size_percent: Decimal,
    pub use_kelly_criterion: bool,
    pub kelly_fraction_cap: Decimal,
    /// Win/loss ratio assumed by the Kelly formula when a strategy does not
    /// supply its own.
    pub win_loss_ratio: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_position_size_percent: dec!(0.02),
            use_kelly_criterion: false,
            kelly_fraction_cap: dec!(0.25),
            win_loss_ratio: dec!(1.5),
        }
    }
}

pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Fraction of available capital to risk on this signal, before
    /// strength/multiplier scaling. `win_probability` is the signal's
    /// confidence; negative Kelly values clamp to zero.
    fn base_fraction(&self, win_probability: Decimal) -> Decimal {
        if !self.config.use_kelly_criterion {
            return self.config.default_position_size_percent;
        }
        let ratio = self.config.win_loss_ratio;
        if ratio.is_zero() {
            return dec!(0);
        }
        let kelly = (win_probability * ratio - (Decimal::ONE - win_probability)) / ratio;
        kelly.max(dec!(0)).min(self.config.kelly_fraction_cap)
    }

    /// Computes the order quantity in base units: fraction of available
    /// capital, scaled by signal strength and the mapping's size
    /// multiplier, clamped to `max_position_size_usdt`, converted to units
    /// via `current_price`, scaled by `leverage`.
    #[allow(clippy::too_many_arguments)]
    pub fn size_order(
        &self,
        available: Decimal,
        win_probability: Decimal,
        strength: Decimal,
        size_multiplier: Decimal,
        max_position_size_usdt: Decimal,
        current_price: Decimal,
        leverage: u32,
    ) -> Decimal {
        if current_price.is_zero() {
            return dec!(0);
        }
        let fraction = self.base_fraction(win_probability);
        let notional = (available * fraction * strength * size_multiplier).min(max_position_size_usdt);
        let notional = notional.max(dec!(0));
        (notional / current_price) * Decimal::from(leverage.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_percent_sizing_scales_with_available_capital() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let qty = sizer.size_order(
            Decimal::from(10_000),
            dec!(0.6),
            dec!(1.0),
            dec!(1.0),
            Decimal::from(10_000),
            Decimal::from(50_000),
            1,
        );
        // 2% of 10000 = 200 notional / 50000 price = 0.004
        assert_eq!(qty, dec!(0.004));
    }

    #[test]
    fn kelly_sizing_clamps_negative_fraction_to_zero() {
        let mut config = SizingConfig::default();
        config.use_kelly_criterion = true;
        config.win_loss_ratio = dec!(1.0);
        let sizer = PositionSizer::new(config);
        // win_probability 0.2 with ratio 1.0 -> kelly negative -> clamps to 0
        let qty = sizer.size_order(
            Decimal::from(10_000),
            dec!(0.2),
            dec!(1.0),
            dec!(1.0),
            Decimal::from(10_000),
            Decimal::from(50_000),
            1,
        );
        assert_eq!(qty, dec!(0));
    }

    #[test]
    fn kelly_sizing_is_capped_at_configured_fraction() {
        let mut config = SizingConfig::default();
        config.use_kelly_criterion = true;
        config.kelly_fraction_cap = dec!(0.1);
        config.win_loss_ratio = dec!(3.0);
        let sizer = PositionSizer::new(config);
        // win_probability near 1 would blow past the cap without clamping
        let qty = sizer.size_order(
            Decimal::from(10_000),
            dec!(0.95),
            dec!(1.0),
            dec!(1.0),
            Decimal::from(1_000_000),
            Decimal::from(50_000),
            1,
        );
        // capped fraction 0.1 * 10000 = 1000 notional / 50000 = 0.02
        assert_eq!(qty, dec!(0.02));
    }

    #[test]
    fn leverage_multiplies_unit_quantity() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let qty = sizer.size_order(
            Decimal::from(10_000),
            dec!(0.6),
            dec!(1.0),
            dec!(1.0),
            Decimal::from(10_000),
            Decimal::from(50_000),
            5,
        );
        assert_eq!(qty, dec!(0.004) * Decimal::from(5));
    }
}
