//! Chain identities for the networks a bonder operates on.
//!
//! Chains are referred to by slug throughout the system (configuration keys,
//! storage records, log fields). The slug determines which finality model a
//! chain follows via [`ChainFamily`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSlug {
	Ethereum,
	Optimism,
	Arbitrum,
	Gnosis,
	Polygon,
	Base,
	Nova,
	Linea,
	Scroll,
	#[serde(rename = "polygonzk")]
	PolygonZk,
}

/// Finality model a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
	/// Proof-of-stake L1 with native `safe`/`finalized` tags.
	L1,
	/// OP-stack rollup whose safety derives from an L1 output checkpoint.
	OptimisticRollup,
	/// Arbitrum-style rollup; its tags already follow L1 finality.
	ArbitrumRollup,
	/// Sidechain with probabilistic finality.
	Sidechain,
	/// Validity rollup with a long proving delay.
	ZkRollup,
}

impl ChainSlug {
	/// Returns the string representation used in configuration and storage keys.
	pub fn as_str(&self) -> &'static str {
		match self {
			ChainSlug::Ethereum => "ethereum",
			ChainSlug::Optimism => "optimism",
			ChainSlug::Arbitrum => "arbitrum",
			ChainSlug::Gnosis => "gnosis",
			ChainSlug::Polygon => "polygon",
			ChainSlug::Base => "base",
			ChainSlug::Nova => "nova",
			ChainSlug::Linea => "linea",
			ChainSlug::Scroll => "scroll",
			ChainSlug::PolygonZk => "polygonzk",
		}
	}

	/// Returns an iterator over all supported chains.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Ethereum,
			Self::Optimism,
			Self::Arbitrum,
			Self::Gnosis,
			Self::Polygon,
			Self::Base,
			Self::Nova,
			Self::Linea,
			Self::Scroll,
			Self::PolygonZk,
		]
		.into_iter()
	}

	pub fn family(&self) -> ChainFamily {
		match self {
			ChainSlug::Ethereum => ChainFamily::L1,
			ChainSlug::Optimism | ChainSlug::Base => ChainFamily::OptimisticRollup,
			ChainSlug::Arbitrum | ChainSlug::Nova => ChainFamily::ArbitrumRollup,
			ChainSlug::Gnosis | ChainSlug::Polygon => ChainFamily::Sidechain,
			ChainSlug::Linea | ChainSlug::Scroll | ChainSlug::PolygonZk => ChainFamily::ZkRollup,
		}
	}

	/// Typical time between blocks, used to turn wall-clock windows into
	/// confirmation counts.
	pub fn average_block_time(&self) -> Duration {
		match self {
			ChainSlug::Ethereum => Duration::from_secs(12),
			ChainSlug::Optimism | ChainSlug::Base => Duration::from_secs(2),
			ChainSlug::Arbitrum | ChainSlug::Nova => Duration::from_millis(250),
			ChainSlug::Gnosis => Duration::from_secs(5),
			ChainSlug::Polygon | ChainSlug::Linea => Duration::from_secs(2),
			ChainSlug::Scroll => Duration::from_secs(3),
			ChainSlug::PolygonZk => Duration::from_secs(5),
		}
	}

	/// Number of blocks produced in `window`, rounded up.
	pub fn blocks_in(&self, window: Duration) -> u64 {
		let block_ms = self.average_block_time().as_millis().max(1);
		window.as_millis().div_ceil(block_ms) as u64
	}
}

impl fmt::Display for ChainSlug {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChainSlug {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|chain| chain.as_str() == s)
			.ok_or_else(|| format!("Unknown chain slug: {}", s))
	}
}
