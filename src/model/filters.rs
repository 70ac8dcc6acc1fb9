use serde::{Deserialize, Serialize};
use super::nullable;

/// A sparse set of audio filters.
///
/// A field left as `None` is not configured and is omitted on the wire. For
/// the optional effect blocks, `Some(None)` is sent as `null` and clears the
/// effect on the node.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    /// Volume multiplier, `1.0` being unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<Band>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub karaoke: Option<Option<Karaoke>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub timescale: Option<Option<Timescale>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub tremolo: Option<Option<Oscillation>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub vibrato: Option<Option<Oscillation>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub rotation: Option<Option<Rotation>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub distortion: Option<Option<Distortion>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub channel_mix: Option<Option<ChannelMix>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub low_pass: Option<Option<LowPass>>,
}

impl Filters {
    /// A filter set that resets every filter on the node.
    pub fn cleared() -> Self {
        Self {
            volume: Some(1.0),
            equalizer: Some(Vec::new()),
            karaoke: Some(None),
            timescale: Some(None),
            tremolo: Some(None),
            vibrato: Some(None),
            rotation: Some(None),
            distortion: Some(None),
            channel_mix: Some(None),
            low_pass: Some(None),
        }
    }

    /// Returns a copy of `self` with every field configured in `other`
    /// taking precedence.
    pub fn merged(&self, other: &Filters) -> Filters {
        Filters {
            volume: other.volume.or(self.volume),
            equalizer: other.equalizer.clone().or_else(|| self.equalizer.clone()),
            karaoke: other.karaoke.clone().or_else(|| self.karaoke.clone()),
            timescale: other.timescale.clone().or_else(|| self.timescale.clone()),
            tremolo: other.tremolo.clone().or_else(|| self.tremolo.clone()),
            vibrato: other.vibrato.clone().or_else(|| self.vibrato.clone()),
            rotation: other.rotation.clone().or_else(|| self.rotation.clone()),
            distortion: other.distortion.clone().or_else(|| self.distortion.clone()),
            channel_mix: other.channel_mix.clone().or_else(|| self.channel_mix.clone()),
            low_pass: other.low_pass.clone().or_else(|| self.low_pass.clone()),
        }
    }
}

/// A single equalizer band. There are 15 bands, `0` to `14`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Band {
    pub band: u8,
    /// Gain from `-0.25` (muted) to `1.0`.
    pub gain: f32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
}

/// Settings shared by the tremolo and vibrato filters.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Oscillation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_hz: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_left: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_right: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_left: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_right: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LowPass {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
}
