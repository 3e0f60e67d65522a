//! Push Channel Types
//!
//! Application channel paths for the Bayeux feed. A channel path combines
//! a channel name with one or more target ids:
//!
//! ```text
//! /quotes/19002
//! /quotes/19002,5479,121
//! /orders/912345
//! ```
//!
//! Only some channels accept a comma-joined id list; the single-id
//! channels reject multiple ids before anything is sent.

use thiserror::Error;

/// Errors raised while constructing a channel path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No ids were supplied.
    #[error("at least one id is required for channel {0}")]
    EmptyIds(&'static str),

    /// An id contained a path-significant character.
    #[error("invalid id {id:?} for channel {channel}")]
    InvalidId {
        /// Channel name.
        channel: &'static str,
        /// Offending id.
        id: String,
    },

    /// Multiple ids on a channel that only accepts one.
    #[error("channel {0} does not support multiple ids")]
    MultipleIdsUnsupported(&'static str),
}

/// Application channels exposed by the push feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Real-time quote updates. Accepts an id list.
    Quotes,
    /// Order book depth updates. Accepts an id list.
    OrderBooks,
    /// Trade prints. Accepts an id list.
    Trades,
    /// Position updates for one account.
    Positions,
    /// Order lifecycle updates for one account.
    Orders,
    /// Account summary updates for one account.
    Accounts,
}

impl Channel {
    /// Channel name as it appears in the wire path.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::OrderBooks => "orderbooks",
            Self::Trades => "trades",
            Self::Positions => "positions",
            Self::Orders => "orders",
            Self::Accounts => "accounts",
        }
    }

    /// Whether the channel accepts a comma-joined id list.
    #[must_use]
    pub const fn supports_multiple_ids(&self) -> bool {
        matches!(self, Self::Quotes | Self::OrderBooks | Self::Trades)
    }

    /// Build the channel path for a set of ids.
    ///
    /// Ids are joined with commas for list-capable channels; single-id
    /// channels reject more than one id synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if `ids` is empty, contains an id with a
    /// `/` or `,` character, or has more than one element on a channel
    /// that only accepts one.
    pub fn path(&self, ids: &[String]) -> Result<String, ChannelError> {
        if ids.is_empty() {
            return Err(ChannelError::EmptyIds(self.as_str()));
        }
        if ids.len() > 1 && !self.supports_multiple_ids() {
            return Err(ChannelError::MultipleIdsUnsupported(self.as_str()));
        }
        for id in ids {
            if id.is_empty() || id.contains('/') || id.contains(',') {
                return Err(ChannelError::InvalidId {
                    channel: self.as_str(),
                    id: id.clone(),
                });
            }
        }
        Ok(format!("/{}/{}", self.as_str(), ids.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn single_id_path() {
        let path = Channel::Quotes.path(&["19002".to_string()]).unwrap();
        assert_eq!(path, "/quotes/19002");
    }

    #[test]
    fn multi_id_path_joined_with_commas() {
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let path = Channel::Quotes.path(&ids).unwrap();
        assert_eq!(path, "/quotes/1,2,3");
    }

    #[test]
    fn multi_id_rejected_on_single_id_channel() {
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let err = Channel::Positions.path(&ids).unwrap_err();
        assert_eq!(err, ChannelError::MultipleIdsUnsupported("positions"));
    }

    #[test]
    fn empty_ids_rejected() {
        let err = Channel::Trades.path(&[]).unwrap_err();
        assert_eq!(err, ChannelError::EmptyIds("trades"));
    }

    #[test]
    fn id_with_separator_rejected() {
        let err = Channel::Quotes.path(&["1,2".to_string()]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidId { .. }));

        let err = Channel::Orders.path(&["a/b".to_string()]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidId { .. }));
    }

    #[test_case(Channel::Quotes, "quotes", true)]
    #[test_case(Channel::OrderBooks, "orderbooks", true)]
    #[test_case(Channel::Trades, "trades", true)]
    #[test_case(Channel::Positions, "positions", false)]
    #[test_case(Channel::Orders, "orders", false)]
    #[test_case(Channel::Accounts, "accounts", false)]
    fn channel_names(channel: Channel, name: &str, multi: bool) {
        assert_eq!(channel.as_str(), name);
        assert_eq!(channel.supports_multiple_ids(), multi);
    }
}
