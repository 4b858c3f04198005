//! Engine timing configuration.

use anyerror::AnyError;
use clap::Parser;

/// Error variants related to configuration.
#[derive(Debug, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum ConfigError {
    /// Failed to parse configuration from command-line arguments.
    #[error("ParseError: {source} while parsing ({args:?})")]
    ParseError {
        /// The underlying parse error.
        source: AnyError,
        /// The arguments that failed to parse.
        args: Vec<String>,
    },

    /// The election timeout must be positive.
    #[error("election_timeout must be > 0")]
    ElectionTimeoutIs0,

    /// The request (heartbeat) timeout must be smaller than the election
    /// timeout, or followers will keep starting elections under a healthy
    /// leader.
    #[error("request_timeout({request_timeout}) must be < election_timeout({election_timeout})")]
    RequestTimeoutGEElectionTimeout {
        /// Heartbeat interval value.
        request_timeout: u64,
        /// Election timeout value.
        election_timeout: u64,
    },
}

/// Timing configuration for a Raft server.
///
/// All durations are in milliseconds of the host's monotonic clock (see
/// [`RaftHost::now`](crate::RaftHost::now)).
///
/// # Usage
///
/// Create a configuration, optionally customize fields, validate it, and
/// pass it to [`Raft::with_config`](crate::Raft::with_config):
///
/// ```
/// use sansraft::Config;
///
/// let config = Config {
///     election_timeout: 500,
///     request_timeout: 100,
///     ..Default::default()
/// };
/// let config = config.validate()?;
/// # Ok::<(), sansraft::ConfigError>(())
/// ```
#[derive(Clone, Debug, Parser)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Config {
    /// The election timeout in milliseconds.
    ///
    /// A non-leader starts an election when it has heard nothing from a
    /// valid leader for a randomized duration sampled from
    /// `[election_timeout, 2 * election_timeout)`. It is also the duration
    /// of the lease a follower grants with every accepted AppendEntries or
    /// InstallSnapshot.
    #[clap(long, default_value = "1000")]
    pub election_timeout: u64,

    /// The interval in milliseconds at which a leader sends heartbeats
    /// (possibly empty AppendEntries) to its peers.
    #[clap(long, default_value = "200")]
    pub request_timeout: u64,

    /// Extra slack in milliseconds before a leader that cannot refresh a
    /// majority of leases steps down.
    ///
    /// The grace also covers the window right after a peer becomes
    /// effective, during which the leader has not yet acquired any lease
    /// from it.
    #[clap(long, default_value = "0")]
    pub lease_maintenance_grace: u64,

    /// Whether this server starts for the first time in its life.
    ///
    /// When `false` (a restart), the server assumes it may have granted a
    /// lease before stopping and refuses to grant votes for
    /// `election_timeout` after start.
    #[clap(long)]
    pub first_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(Vec::<&'static str>::new())
    }
}

impl Config {
    /// Build a `Config` instance from a series of command line arguments.
    ///
    /// The first element in `args` must be the application name.
    ///
    /// ```
    /// use sansraft::Config;
    ///
    /// let config = Config::build(&["myapp", "--election-timeout", "2000"])?;
    /// assert_eq!(2000, config.election_timeout);
    /// # Ok::<(), sansraft::ConfigError>(())
    /// ```
    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::try_parse_from(args).map_err(|e| ConfigError::ParseError {
            source: AnyError::from(&e),
            args: args.iter().map(|x| x.to_string()).collect(),
        })?;
        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.election_timeout == 0 {
            return Err(ConfigError::ElectionTimeoutIs0);
        }

        if self.request_timeout >= self.election_timeout {
            return Err(ConfigError::RequestTimeoutGEElectionTimeout {
                request_timeout: self.request_timeout,
                election_timeout: self.election_timeout,
            });
        }

        Ok(self)
    }
}

#[cfg(test)]
mod config_test {
    use pretty_assertions::assert_eq;

    use crate::config::Config;
    use crate::config::ConfigError;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::default();

        assert_eq!(1000, cfg.election_timeout);
        assert_eq!(200, cfg.request_timeout);
        assert_eq!(0, cfg.lease_maintenance_grace);
        assert_eq!(false, cfg.first_start);
    }

    #[test]
    fn test_build() -> anyhow::Result<()> {
        let cfg = Config::build(&[
            "app",
            "--election-timeout=300",
            "--request-timeout=99",
            "--lease-maintenance-grace=42",
            "--first-start",
        ])?;

        assert_eq!(300, cfg.election_timeout);
        assert_eq!(99, cfg.request_timeout);
        assert_eq!(42, cfg.lease_maintenance_grace);
        assert_eq!(true, cfg.first_start);
        Ok(())
    }

    #[test]
    fn test_invalid_config_produces_expected_error() {
        let config = Config {
            election_timeout: 0,
            ..Default::default()
        };
        assert_eq!(ConfigError::ElectionTimeoutIs0, config.validate().unwrap_err());

        let config = Config {
            election_timeout: 100,
            request_timeout: 100,
            ..Default::default()
        };
        assert_eq!(
            ConfigError::RequestTimeoutGEElectionTimeout {
                request_timeout: 100,
                election_timeout: 100,
            },
            config.validate().unwrap_err()
        );
    }
}
