//! Fee and amount policy, evaluated once per transfer.

/// Inclusive bounds on the deposit amount, in decimal units.
#[derive(Debug, Clone, Copy)]
pub struct AmountLimits {
    pub min: f64,
    pub max: f64,
}

impl AmountLimits {
    pub fn contains(&self, amount: f64) -> bool {
        !(amount < self.min || amount > self.max)
    }
}

/// Fees charged on the destination side of a transfer: a flat operator fee
/// plus the estimated chain fee.
#[derive(Debug, Clone, Copy)]
pub struct SideFees {
    pub gateway_fee: f64,
    pub network_fee: f64,
}

impl SideFees {
    pub fn total(&self) -> f64 {
        self.gateway_fee + self.network_fee
    }
}

/// Amounts are carried with 8 decimal places everywhere.
pub fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Raw chain units to decimal units.
pub fn decimal_amount(raw: u128, decimals: u32) -> f64 {
    round8(raw as f64 / 10f64.powi(decimals as i32))
}

/// What the user receives on the destination side.
pub fn credited(deposit: f64, fees: &SideFees) -> f64 {
    round8(deposit - fees.total())
}
