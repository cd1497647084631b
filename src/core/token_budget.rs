// src/core/token_budget.rs — Token estimation and budget management

/// Rough token estimate: four bytes per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Tracks token spending against a budget.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    pub total: usize,
    pub spent: usize,
}

impl TokenBudget {
    pub fn new(total: usize) -> Self {
        Self { total, spent: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.spent)
    }

    /// Deduct `tokens` if they fit; returns whether they did.
    pub fn try_deduct(&mut self, tokens: usize) -> bool {
        if self.spent + tokens > self.total {
            return false;
        }
        self.spent += tokens;
        true
    }

    /// Deduct unconditionally (reserved content that must be kept).
    pub fn deduct(&mut self, tokens: usize) {
        self.spent += tokens;
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_new_budget() {
        let b = TokenBudget::new(200_000);
        assert_eq!(b.remaining(), 200_000);
        assert!(!b.is_exhausted());
    }

    #[test]
    fn test_try_deduct_respects_total() {
        let mut b = TokenBudget::new(100);
        assert!(b.try_deduct(60));
        assert!(!b.try_deduct(50));
        assert_eq!(b.spent, 60);
        assert!(b.try_deduct(40));
        assert!(b.is_exhausted());
    }

    #[test]
    fn test_deduct_saturates_remaining() {
        let mut b = TokenBudget::new(10);
        b.deduct(25);
        assert_eq!(b.remaining(), 0);
        assert!(b.is_exhausted());
    }
}
