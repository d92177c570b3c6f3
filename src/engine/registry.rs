//! Coin registry.
//!
//! Assigns a dense index to every enabled coin. The ratio matrix and the
//! scout engine address coins exclusively through these indices; the
//! registry is rebuilt (together with the matrix) whenever the enabled set
//! changes.

use std::collections::HashMap;

/// Dense index of an enabled coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoinId(pub usize);

/// An enabled coin and its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub id: CoinId,
    pub symbol: String,
}

#[derive(Debug, Clone, Default)]
pub struct CoinRegistry {
    coins: Vec<Coin>,
    by_symbol: HashMap<String, CoinId>,
}

impl CoinRegistry {
    /// Build a registry from the enabled symbols. Symbols are upper-cased,
    /// de-duplicated and sorted so indices are reproducible across restarts.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<String> = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        sorted.sort();
        sorted.dedup();

        let coins: Vec<Coin> = sorted
            .into_iter()
            .enumerate()
            .map(|(idx, symbol)| Coin { id: CoinId(idx), symbol })
            .collect();
        let by_symbol = coins.iter().map(|c| (c.symbol.clone(), c.id)).collect();

        Self { coins, by_symbol }
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn get(&self, id: CoinId) -> &Coin {
        &self.coins[id.0]
    }

    pub fn symbol(&self, id: CoinId) -> &str {
        &self.coins[id.0].symbol
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<CoinId> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn all(&self) -> &[Coin] {
        &self.coins
    }

    pub fn ids(&self) -> impl Iterator<Item = CoinId> + '_ {
        self.coins.iter().map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_sorted_symbols() {
        let reg = CoinRegistry::new(["XRP", "ADA", "BTC"]);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.symbol(CoinId(0)), "ADA");
        assert_eq!(reg.symbol(CoinId(1)), "BTC");
        assert_eq!(reg.symbol(CoinId(2)), "XRP");
        assert_eq!(reg.by_symbol("XRP"), Some(CoinId(2)));
    }

    #[test]
    fn test_normalises_and_dedups() {
        let reg = CoinRegistry::new([" eth", "ETH", "", "bnb "]);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.by_symbol("BNB"), Some(CoinId(0)));
        assert_eq!(reg.by_symbol("ETH"), Some(CoinId(1)));
        assert!(reg.by_symbol("eth").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let reg = CoinRegistry::new(Vec::<String>::new());
        assert!(reg.is_empty());
        assert_eq!(reg.ids().count(), 0);
    }
}
