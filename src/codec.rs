use crate::error::{KMeansError, Result};
use serde::{Deserialize, Serialize};

/// One worker's contribution to one center for one round.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PartialSum {
    pub center: usize,
    pub count: u64,
    pub sum: Vec<f64>,
}

impl PartialSum {
    pub fn new(center: usize, count: u64, sum: Vec<f64>) -> Self {
        PartialSum { center, count, sum }
    }

    /// Both codecs refuse to put an overflowed sum on the wire.
    fn ensure_finite(&self) -> Result<()> {
        match self.sum.iter().position(|x| !x.is_finite()) {
            Some(d) => Err(KMeansError::overflow(format!(
                "partial sum for center {} has non-finite component {} ({})",
                self.center, d, self.sum[d]
            ))),
            None => Ok(()),
        }
    }
}

/// Serializes partial sums into the byte payloads carried by the message bus.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, msg: &PartialSum) -> Result<Vec<u8>>;
    fn decode(&self, payload: &[u8]) -> Result<PartialSum>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Text,
    Binary,
}

impl WireFormat {
    pub fn codec(self) -> Box<dyn MessageCodec> {
        match self {
            WireFormat::Text => Box::new(TextCodec),
            WireFormat::Binary => Box::new(BinaryCodec),
        }
    }
}

/// `"<centerIndex>:<count>:<v1>,<v2>,...,<vD>"`. Only the first two colons
/// separate fields. Floats use Rust's shortest round-trip formatting, so a
/// message decodes to exactly the sums that were encoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextCodec;

impl TextCodec {
    pub fn format(msg: &PartialSum) -> String {
        format!("{}:{}:{}", msg.center, msg.count, format_vector(&msg.sum))
    }

    pub fn parse(text: &str) -> Result<PartialSum> {
        let mut parts = text.trim().splitn(3, ':');
        let (center, count, vector) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(n), Some(v)) => (c, n, v),
            _ => {
                return Err(KMeansError::parse(format!(
                    "message '{}' is missing a field",
                    text
                )))
            }
        };

        let center = center.trim().parse::<usize>().map_err(|e| {
            KMeansError::parse(format!("bad center index '{}': {}", center, e))
        })?;
        let count = count
            .trim()
            .parse::<u64>()
            .map_err(|e| KMeansError::parse(format!("bad count '{}': {}", count, e)))?;
        let sum = parse_components(vector)?;

        Ok(PartialSum { center, count, sum })
    }
}

impl MessageCodec for TextCodec {
    fn encode(&self, msg: &PartialSum) -> Result<Vec<u8>> {
        msg.ensure_finite()?;
        Ok(Self::format(msg).into_bytes())
    }

    fn decode(&self, payload: &[u8]) -> Result<PartialSum> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| KMeansError::parse(format!("message is not UTF-8: {}", e)))?;
        Self::parse(text)
    }
}

/// Fixed-width little-endian encoding of the same three fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryCodec;

impl MessageCodec for BinaryCodec {
    fn encode(&self, msg: &PartialSum) -> Result<Vec<u8>> {
        msg.ensure_finite()?;
        let config = bincode::config::standard().with_fixed_int_encoding();
        bincode::serde::encode_to_vec(msg, config)
            .map_err(|e| KMeansError::Codec(format!("bincode encoding error: {}", e)))
    }

    fn decode(&self, payload: &[u8]) -> Result<PartialSum> {
        let config = bincode::config::standard().with_fixed_int_encoding();
        let (msg, read): (PartialSum, usize) =
            bincode::serde::decode_from_slice(payload, config)
                .map_err(|e| KMeansError::Codec(format!("bincode decoding error: {}", e)))?;
        if read != payload.len() {
            return Err(KMeansError::Codec(format!(
                "trailing {} bytes after message",
                payload.len() - read
            )));
        }
        msg.ensure_finite()?;
        Ok(msg)
    }
}

/// Comma-separated decimal components, no trailing separator.
pub fn format_vector(v: &[f64]) -> String {
    v.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_components(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(|s| {
            let s = s.trim();
            let x = s
                .parse::<f64>()
                .map_err(|e| KMeansError::parse(format!("bad component '{}': {}", s, e)))?;
            if !x.is_finite() {
                return Err(KMeansError::parse(format!("non-finite component '{}'", s)));
            }
            Ok(x)
        })
        .collect()
}

/// Parses one input record into a vector of exactly `dim` components.
pub fn parse_vector_record(text: &str, dim: usize) -> Result<Vec<f64>> {
    let v = parse_components(text)?;
    if v.len() != dim {
        return Err(KMeansError::parse(format!(
            "record '{}' has {} components, expected {}",
            text.trim(),
            v.len(),
            dim
        )));
    }
    Ok(v)
}
