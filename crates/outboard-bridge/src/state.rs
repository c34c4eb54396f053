//! Plugin state tokens.
//!
//! A token is a single whitespace-free word so it can ride on a command line:
//!
//! - `EMPTY`: nothing to restore
//! - `DUAL:<base64>`: `[u64 LE len][processor bytes][u64 LE len][controller bytes]`
//! - `PARAMS:<id>=<value>;...`: parameter list for plugins without byte-stream state

use crate::error::{BridgeError, Result};
use crate::instance::HostedPlugin;
use base64::{engine::general_purpose, Engine as _};
use std::fmt::Write as _;

const EMPTY_TAG: &str = "EMPTY";
const DUAL_PREFIX: &str = "DUAL:";
const PARAMS_PREFIX: &str = "PARAMS:";

const LEN_PREFIX: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, PartialEq)]
pub enum StateToken {
    Empty,
    Dual {
        processor: Vec<u8>,
        controller: Vec<u8>,
    },
    Params(Vec<(u32, f64)>),
}

impl StateToken {
    pub fn is_empty(&self) -> bool {
        matches!(self, StateToken::Empty)
    }

    pub fn encode(&self) -> String {
        match self {
            StateToken::Empty => EMPTY_TAG.to_string(),
            StateToken::Dual {
                processor,
                controller,
            } => {
                let mut blob =
                    Vec::with_capacity(2 * LEN_PREFIX + processor.len() + controller.len());
                for part in [processor, controller] {
                    blob.extend_from_slice(&(part.len() as u64).to_le_bytes());
                    blob.extend_from_slice(part);
                }
                format!("{}{}", DUAL_PREFIX, general_purpose::STANDARD.encode(blob))
            }
            StateToken::Params(params) => {
                let mut text = String::from(PARAMS_PREFIX);
                for (id, value) in params {
                    let _ = write!(text, "{}={};", id, value);
                }
                text
            }
        }
    }

    pub fn decode(token: &str) -> Result<Self> {
        let token = token.trim();

        if token == EMPTY_TAG {
            return Ok(StateToken::Empty);
        }

        if let Some(encoded) = token.strip_prefix(DUAL_PREFIX) {
            let blob = general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| BridgeError::StateFormat(format!("invalid base64: {}", e)))?;
            return decode_dual(&blob);
        }

        if let Some(list) = token.strip_prefix(PARAMS_PREFIX) {
            return Ok(StateToken::Params(decode_params(list)));
        }

        Err(BridgeError::StateFormat(
            token.chars().take(16).collect::<String>(),
        ))
    }
}

fn take_part<'a>(blob: &'a [u8], offset: &mut usize) -> Result<&'a [u8]> {
    let header = blob
        .get(*offset..*offset + LEN_PREFIX)
        .ok_or_else(|| BridgeError::StateFormat("truncated length prefix".to_string()))?;
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(header);
    let len = u64::from_le_bytes(len_bytes);
    *offset += LEN_PREFIX;

    let len = usize::try_from(len)
        .map_err(|_| BridgeError::StateFormat("part length overflows".to_string()))?;
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= blob.len())
        .ok_or_else(|| {
            BridgeError::StateFormat(format!(
                "part of {} bytes exceeds remaining {} bytes",
                len,
                blob.len() - *offset
            ))
        })?;

    let part = &blob[*offset..end];
    *offset = end;
    Ok(part)
}

fn decode_dual(blob: &[u8]) -> Result<StateToken> {
    let mut offset = 0;
    let processor = take_part(blob, &mut offset)?.to_vec();
    let controller = if offset < blob.len() {
        take_part(blob, &mut offset)?.to_vec()
    } else {
        Vec::new()
    };

    Ok(StateToken::Dual {
        processor,
        controller,
    })
}

fn decode_params(list: &str) -> Vec<(u32, f64)> {
    let mut params = Vec::new();
    for entry in list.split(';').filter(|e| !e.trim().is_empty()) {
        let parsed = entry.split_once('=').and_then(|(id, value)| {
            Some((id.trim().parse::<u32>().ok()?, value.trim().parse::<f64>().ok()?))
        });
        match parsed {
            Some(pair) => params.push(pair),
            None => tracing::warn!(entry, "skipping malformed parameter entry"),
        }
    }
    params
}

/// Captures the plugin's state, falling back to its parameter list when it has no
/// byte-stream state at all.
pub fn capture_state(plugin: &mut dyn HostedPlugin) -> Result<StateToken> {
    let processor = plugin.processor_state()?;
    let controller = plugin.controller_state()?;

    if processor.is_none() && controller.is_none() {
        let params = plugin.parameters();
        if params.is_empty() {
            return Ok(StateToken::Empty);
        }
        return Ok(StateToken::Params(params));
    }

    let processor = processor.unwrap_or_default();
    let controller = controller.unwrap_or_default();
    if processor.is_empty() && controller.is_empty() {
        return Ok(StateToken::Empty);
    }

    Ok(StateToken::Dual {
        processor,
        controller,
    })
}

pub fn restore_state(plugin: &mut dyn HostedPlugin, token: &StateToken) -> Result<()> {
    match token {
        StateToken::Empty => return Ok(()),
        StateToken::Dual {
            processor,
            controller,
        } => {
            if !processor.is_empty() {
                plugin
                    .set_processor_state(processor)
                    .map_err(|e| BridgeError::StateRestore(format!("processor: {}", e)))?;
            }
            if !controller.is_empty() {
                plugin
                    .set_controller_state(controller)
                    .map_err(|e| BridgeError::StateRestore(format!("controller: {}", e)))?;
            }
        }
        StateToken::Params(params) => {
            for &(id, value) in params {
                if let Err(e) = plugin.set_parameter(id, value) {
                    tracing::warn!(id, value, error = %e, "failed to restore parameter");
                }
            }
        }
    }

    plugin.state_refreshed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::StereoBuffer;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    /// Plugin double with configurable state support.
    #[derive(Default)]
    struct FakePlugin {
        byte_state: bool,
        processor: Vec<u8>,
        controller: Vec<u8>,
        params: BTreeMap<u32, f64>,
        refreshed: usize,
    }

    impl HostedPlugin for FakePlugin {
        fn name(&self) -> &str {
            "fake"
        }

        fn process(&mut self, _buffer: &mut StereoBuffer<'_>) {}

        fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.byte_state.then(|| self.processor.clone()))
        }

        fn controller_state(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.byte_state.then(|| self.controller.clone()))
        }

        fn set_processor_state(&mut self, data: &[u8]) -> Result<()> {
            self.processor = data.to_vec();
            Ok(())
        }

        fn set_controller_state(&mut self, data: &[u8]) -> Result<()> {
            self.controller = data.to_vec();
            Ok(())
        }

        fn parameters(&self) -> Vec<(u32, f64)> {
            self.params.iter().map(|(&id, &v)| (id, v)).collect()
        }

        fn set_parameter(&mut self, id: u32, value: f64) -> Result<()> {
            if !self.params.contains_key(&id) {
                return Err(BridgeError::StateRestore(format!("no parameter {}", id)));
            }
            self.params.insert(id, value);
            Ok(())
        }

        fn state_refreshed(&mut self) {
            self.refreshed += 1;
        }
    }

    #[test]
    fn test_empty_token() {
        assert_eq!(StateToken::Empty.encode(), "EMPTY");
        assert_eq!(StateToken::decode("EMPTY").unwrap(), StateToken::Empty);
    }

    #[test]
    fn test_dual_layout() {
        let token = StateToken::Dual {
            processor: vec![1, 2, 3],
            controller: vec![],
        };
        let encoded = token.encode();
        assert!(encoded.starts_with("DUAL:"));

        let blob = general_purpose::STANDARD.decode(&encoded[5..]).unwrap();
        assert_eq!(blob.len(), 8 + 3 + 8);
        assert_eq!(&blob[..8], &3u64.to_le_bytes());
        assert_eq!(&blob[8..11], &[1, 2, 3]);
        assert_eq!(&blob[11..], &0u64.to_le_bytes());

        assert_eq!(StateToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_dual_truncated_part_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&100u64.to_le_bytes());
        blob.extend_from_slice(&[0u8; 10]);
        let token = format!("DUAL:{}", general_purpose::STANDARD.encode(blob));
        assert!(matches!(
            StateToken::decode(&token),
            Err(BridgeError::StateFormat(_))
        ));
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(matches!(
            StateToken::decode("VST2:abcd"),
            Err(BridgeError::StateFormat(_))
        ));
        assert!(StateToken::decode("DUAL:***").is_err());
    }

    #[test]
    fn test_params_skip_malformed_entries() {
        let token = StateToken::decode("PARAMS:0=0.25;x=1;3=abc;;7=0.5;9").unwrap();
        assert_eq!(token, StateToken::Params(vec![(0, 0.25), (7, 0.5)]));
    }

    #[test]
    fn test_capture_empty_when_no_state() {
        let mut plugin = FakePlugin::default();
        assert_eq!(capture_state(&mut plugin).unwrap(), StateToken::Empty);

        let mut plugin = FakePlugin {
            byte_state: true,
            ..Default::default()
        };
        assert_eq!(capture_state(&mut plugin).unwrap(), StateToken::Empty);
    }

    #[test]
    fn test_dual_state_restores_only_nonempty_parts() {
        let mut source = FakePlugin {
            byte_state: true,
            processor: b"proc".to_vec(),
            controller: Vec::new(),
            ..Default::default()
        };
        let token = StateToken::decode(&capture_state(&mut source).unwrap().encode()).unwrap();

        let mut target = FakePlugin {
            byte_state: true,
            controller: b"keep".to_vec(),
            ..Default::default()
        };
        restore_state(&mut target, &token).unwrap();
        assert_eq!(target.processor, b"proc");
        assert_eq!(target.controller, b"keep");
        assert_eq!(target.refreshed, 1);
    }

    #[test]
    fn test_parameter_fallback_roundtrip() {
        let values = [(0u32, 0.1f64), (1, 0.333_333_333_333), (42, 1.0), (7, 0.0)];

        let mut source = FakePlugin::default();
        source.params.extend(values);
        let token = capture_state(&mut source).unwrap();
        assert!(matches!(token, StateToken::Params(_)));

        let mut target = FakePlugin::default();
        target.params.extend(values.iter().map(|&(id, _)| (id, 0.5)));
        restore_state(&mut target, &StateToken::decode(&token.encode()).unwrap()).unwrap();

        for (id, value) in values {
            assert_relative_eq!(target.params[&id], value, epsilon = 1e-12);
        }
        assert_eq!(target.refreshed, 1);
    }

    #[test]
    fn test_parameter_restore_continues_past_failures() {
        let mut target = FakePlugin::default();
        target.params.insert(1, 0.0);
        target.params.insert(2, 0.0);

        let token = StateToken::Params(vec![(1, 0.4), (99, 0.9), (2, 0.6)]);
        restore_state(&mut target, &token).unwrap();
        assert_relative_eq!(target.params[&1], 0.4);
        assert_relative_eq!(target.params[&2], 0.6);
    }
}
