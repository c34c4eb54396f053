//! Helper command-line arguments.
//!
//! `-uid <id> -pipe <name> -shm <name> -event_ready <name> -event_done <name> [-block <len>]`
//!
//! Names arrive already suffixed with the session id.

use outboard_bridge::{BridgeConfig, BridgeError, Result, SessionNames};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperArgs {
    pub session_id: u64,
    pub names: SessionNames,
    pub max_block_len: usize,
}

impl HelperArgs {
    /// Parses arguments without the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session_id = None;
        let mut channel = None;
        let mut shared_block = None;
        let mut ready_event = None;
        let mut done_event = None;
        let mut max_block_len = BridgeConfig::default().max_block_len;

        let mut args = args.into_iter().map(Into::into);
        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .ok_or_else(|| BridgeError::InvalidConfig(format!("{} needs a value", flag)))
            };

            match flag.as_str() {
                "-uid" => {
                    let raw = value()?;
                    session_id = Some(raw.parse::<u64>().map_err(|_| {
                        BridgeError::InvalidConfig(format!("invalid session id '{}'", raw))
                    })?);
                }
                "-pipe" => channel = Some(value()?),
                "-shm" => shared_block = Some(value()?),
                "-event_ready" => ready_event = Some(value()?),
                "-event_done" => done_event = Some(value()?),
                "-block" => {
                    let raw = value()?;
                    max_block_len = match raw.parse::<usize>() {
                        Ok(len) if len > 0 => len,
                        _ => {
                            return Err(BridgeError::InvalidConfig(format!(
                                "invalid block length '{}'",
                                raw
                            )))
                        }
                    };
                }
                other => tracing::warn!(flag = other, "ignoring unknown argument"),
            }
        }

        let require = |value: Option<String>, flag: &str| {
            value.ok_or_else(|| BridgeError::InvalidConfig(format!("missing {}", flag)))
        };

        Ok(Self {
            session_id: session_id
                .ok_or_else(|| BridgeError::InvalidConfig("missing -uid".to_string()))?,
            names: SessionNames {
                channel: require(channel, "-pipe")?,
                shared_block: require(shared_block, "-shm")?,
                ready_event: require(ready_event, "-event_ready")?,
                done_event: require(done_event, "-event_done")?,
            },
            max_block_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboard_bridge::{HelperProcess, TransportNames};

    #[test]
    fn test_parses_host_arguments() {
        let names = TransportNames::default().for_session(99);
        let args = HelperArgs::parse(HelperProcess::args(99, &names, 512)).unwrap();
        assert_eq!(args.session_id, 99);
        assert_eq!(args.names, names);
        assert_eq!(args.max_block_len, 512);
    }

    #[test]
    fn test_block_defaults_and_order_independent() {
        let args = HelperArgs::parse([
            "-shm", "S_1", "-event_done", "D_1", "-uid", "1", "-pipe", "P_1", "-event_ready",
            "R_1",
        ])
        .unwrap();
        assert_eq!(args.max_block_len, 2048);
        assert_eq!(args.names.channel, "P_1");
        assert_eq!(args.names.done_event, "D_1");
    }

    #[test]
    fn test_missing_or_bad_values() {
        assert!(HelperArgs::parse(["-uid", "1"]).is_err());
        assert!(HelperArgs::parse(["-uid"]).is_err());
        assert!(HelperArgs::parse([
            "-uid", "x", "-pipe", "P", "-shm", "S", "-event_ready", "R", "-event_done", "D",
        ])
        .is_err());
        assert!(HelperArgs::parse([
            "-uid", "1", "-pipe", "P", "-shm", "S", "-event_ready", "R", "-event_done", "D",
            "-block", "0",
        ])
        .is_err());
    }
}
