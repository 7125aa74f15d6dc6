use serde::{Deserialize, Serialize};

use crate::parser::CHANNEL_COUNT;

/// Wave-type marker carried by every channel entry of a submission.
pub const WAVE_TYPE: u8 = 1;

/// One channel series, shaped the way the collection endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSeries {
    #[serde(rename = "waveType")]
    pub wave_type: u8,
    /// Channel index rendered as a string, "0" through "7".
    pub number: String,
    pub voltage: Vec<i32>,
}

/// The submission unit for one finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub channels: Vec<ChannelSeries>,
    #[serde(rename = "mentalImage")]
    pub mental_image: String,
}

impl SessionPayload {
    /// Assemble the payload from parsed channels and the session label.
    /// The label is attached verbatim; the caller has already trimmed it.
    pub fn build(channels: [Vec<i32>; CHANNEL_COUNT], label: &str) -> Self {
        let channels = channels
            .into_iter()
            .enumerate()
            .map(|(index, voltage)| ChannelSeries {
                wave_type: WAVE_TYPE,
                number: index.to_string(),
                voltage,
            })
            .collect();
        SessionPayload {
            channels,
            mental_image: label.to_string(),
        }
    }
}
