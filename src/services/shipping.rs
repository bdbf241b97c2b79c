use crate::config::ShippingConfig;
use crate::entities::order::CustomerType;
use rust_decimal::Decimal;

/// Shipping cost rules for checkout
#[derive(Clone, Debug)]
pub struct ShippingPolicy {
    config: ShippingConfig,
}

impl ShippingPolicy {
    pub fn new(config: ShippingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShippingConfig {
        &self.config
    }

    /// Cost for an order of `total_units` units.
    ///
    /// An explicit cost from the caller wins when overrides are accepted. Wholesale always
    /// pays the flat fee; retail ships free from the configured unit threshold.
    pub fn cost(
        &self,
        customer_type: CustomerType,
        total_units: u32,
        explicit_cost: Option<Decimal>,
    ) -> Decimal {
        if let Some(cost) = explicit_cost.filter(|_| self.config.accept_override) {
            return cost;
        }

        match customer_type {
            CustomerType::Wholesale => self.config.flat_fee,
            CustomerType::Retail if total_units >= self.config.free_shipping_min_units => {
                Decimal::ZERO
            }
            CustomerType::Retail => self.config.flat_fee,
        }
    }
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self::new(ShippingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(CustomerType::Retail, 1, dec!(15000))]
    #[case(CustomerType::Retail, 5, dec!(15000))]
    #[case(CustomerType::Retail, 6, dec!(0))]
    #[case(CustomerType::Retail, 40, dec!(0))]
    #[case(CustomerType::Wholesale, 1, dec!(15000))]
    #[case(CustomerType::Wholesale, 100, dec!(15000))]
    fn default_policy(#[case] customer: CustomerType, #[case] units: u32, #[case] expected: Decimal) {
        assert_eq!(ShippingPolicy::default().cost(customer, units, None), expected);
    }

    #[test]
    fn explicit_cost_wins_when_accepted() {
        let policy = ShippingPolicy::default();
        assert_eq!(
            policy.cost(CustomerType::Retail, 10, Some(dec!(8000))),
            dec!(8000)
        );
        assert_eq!(
            policy.cost(CustomerType::Wholesale, 1, Some(Decimal::ZERO)),
            Decimal::ZERO
        );
    }

    #[test]
    fn explicit_cost_ignored_when_overrides_disabled() {
        let policy = ShippingPolicy::new(ShippingConfig {
            accept_override: false,
            ..ShippingConfig::default()
        });
        assert_eq!(
            policy.cost(CustomerType::Retail, 2, Some(dec!(1))),
            dec!(15000)
        );
    }

    #[test]
    fn thresholds_follow_configuration() {
        let policy = ShippingPolicy::new(ShippingConfig {
            flat_fee: dec!(9900),
            free_shipping_min_units: 3,
            accept_override: true,
        });
        assert_eq!(policy.cost(CustomerType::Retail, 2, None), dec!(9900));
        assert_eq!(policy.cost(CustomerType::Retail, 3, None), Decimal::ZERO);
    }
}
