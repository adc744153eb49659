use super::Abort;

/// Remaining-energy accounting for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyMeter {
    limit: u64,
    used: u64,
}

impl EnergyMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Deduct `amount`. Exhaustion consumes the whole limit.
    pub fn charge(&mut self, amount: u64) -> Result<(), Abort> {
        let next = self.used.saturating_add(amount);
        if next > self.limit {
            tracing::trace!(amount, used = self.used, limit = self.limit, "energy exhausted");
            self.used = self.limit;
            return Err(Abort::OutOfEnergy);
        }
        self.used = next;
        Ok(())
    }

    /// Charge `units * unit_cost`, saturating.
    pub fn charge_bytes(&mut self, units: u64, unit_cost: u64) -> Result<(), Abort> {
        self.charge(units.saturating_mul(unit_cost))
    }

    /// Fail now if a charge of `amount` that is still to come cannot succeed.
    pub fn ensure_available(&mut self, amount: u64) -> Result<(), Abort> {
        if amount > self.remaining() {
            self.used = self.limit;
            return Err(Abort::OutOfEnergy);
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
