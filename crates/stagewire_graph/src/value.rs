// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload kinds that flow through ports.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Payload discriminant of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    /// Boolean flag
    Bool,
    /// Single number
    Number,
    /// List of numbers
    NumberList,
    /// UTF-8 text
    Text,
    /// 2D vector
    Vec2,
    /// List of 2D vectors
    Vec2List,
    /// 3D vector
    Vec3,
    /// List of 3D vectors
    Vec3List,
    /// Rotation quaternion (x, y, z, w)
    Quaternion,
    /// RGBA color
    Color,
    /// List of RGBA colors
    ColorList,
    /// Arbitrary JSON document
    Json,
    /// Video frame / still image
    Image,
    /// Block of interleaved audio samples
    AudioBuffer,
    /// Handle into an external audio engine
    AudioNodeHandle,
    /// Detected feature (computer vision)
    Feature,
    /// List of detected features
    FeatureList,
    /// Tracked bodies (skeleton tracking)
    BodyList,
    /// Not yet bound to a concrete type
    Generic,
}

impl PortType {
    /// Every type a port can carry values of (everything but `Generic`)
    pub const CONCRETE: [PortType; 18] = [
        PortType::Bool,
        PortType::Number,
        PortType::NumberList,
        PortType::Text,
        PortType::Vec2,
        PortType::Vec2List,
        PortType::Vec3,
        PortType::Vec3List,
        PortType::Quaternion,
        PortType::Color,
        PortType::ColorList,
        PortType::Json,
        PortType::Image,
        PortType::AudioBuffer,
        PortType::AudioNodeHandle,
        PortType::Feature,
        PortType::FeatureList,
        PortType::BodyList,
    ];

    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Number => "number",
            Self::NumberList => "numberList",
            Self::Text => "text",
            Self::Vec2 => "vec2",
            Self::Vec2List => "vec2List",
            Self::Vec3 => "vec3",
            Self::Vec3List => "vec3List",
            Self::Quaternion => "quaternion",
            Self::Color => "color",
            Self::ColorList => "colorList",
            Self::Json => "json",
            Self::Image => "image",
            Self::AudioBuffer => "audioBuffer",
            Self::AudioNodeHandle => "audioNodeHandle",
            Self::Feature => "feature",
            Self::FeatureList => "featureList",
            Self::BodyList => "bodyList",
            Self::Generic => "generic",
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "generic" {
            return Some(Self::Generic);
        }
        Self::CONCRETE.iter().copied().find(|t| t.as_str() == name)
    }

    /// Whether this is the unbound placeholder type
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interleaved audio samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Samples, interleaved
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// A detected feature, e.g. a face or marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Classifier label
    pub label: String,
    /// Detection confidence (0-1)
    pub confidence: f32,
    /// Normalized bounds (x, y, width, height)
    pub bounds: [f32; 4],
}

/// One tracked joint of a body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    /// Joint name (e.g. "head", "hand_left")
    pub name: String,
    /// Position in tracker space
    pub position: [f32; 3],
    /// Tracking confidence (0-1)
    pub confidence: f32,
}

/// A tracked body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Tracker-assigned body id
    pub id: u32,
    /// Tracked joints
    pub joints: Vec<Joint>,
}

/// A value carried by a port
#[derive(Debug, Clone)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// Number list
    NumberList(Vec<f64>),
    /// Text
    Text(String),
    /// 2D vector
    Vec2([f32; 2]),
    /// 2D vector list
    Vec2List(Vec<[f32; 2]>),
    /// 3D vector
    Vec3([f32; 3]),
    /// 3D vector list
    Vec3List(Vec<[f32; 3]>),
    /// Quaternion (x, y, z, w)
    Quaternion([f32; 4]),
    /// Color (RGBA)
    Color([f32; 4]),
    /// Color list
    ColorList(Vec<[f32; 4]>),
    /// JSON document
    Json(Value),
    /// Image, shared between listeners
    Image(Arc<image::DynamicImage>),
    /// Audio block, shared between listeners
    AudioBuffer(Arc<AudioBuffer>),
    /// External audio node handle
    AudioNodeHandle(u64),
    /// Detected feature
    Feature(Feature),
    /// Detected features
    FeatureList(Vec<Feature>),
    /// Tracked bodies
    BodyList(Vec<Body>),
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Number(_) => PortType::Number,
            Self::NumberList(_) => PortType::NumberList,
            Self::Text(_) => PortType::Text,
            Self::Vec2(_) => PortType::Vec2,
            Self::Vec2List(_) => PortType::Vec2List,
            Self::Vec3(_) => PortType::Vec3,
            Self::Vec3List(_) => PortType::Vec3List,
            Self::Quaternion(_) => PortType::Quaternion,
            Self::Color(_) => PortType::Color,
            Self::ColorList(_) => PortType::ColorList,
            Self::Json(_) => PortType::Json,
            Self::Image(_) => PortType::Image,
            Self::AudioBuffer(_) => PortType::AudioBuffer,
            Self::AudioNodeHandle(_) => PortType::AudioNodeHandle,
            Self::Feature(_) => PortType::Feature,
            Self::FeatureList(_) => PortType::FeatureList,
            Self::BodyList(_) => PortType::BodyList,
        }
    }

    /// Number payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Bool payload, if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text payload, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value for the wire.
    ///
    /// Images become `{width, height, png}` with base64 PNG data; audio blocks
    /// are sent sample by sample.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => json!(b),
            Self::Number(n) => json!(n),
            Self::NumberList(v) => json!(v),
            Self::Text(s) => json!(s),
            Self::Vec2(v) => json!(v),
            Self::Vec2List(v) => json!(v),
            Self::Vec3(v) => json!(v),
            Self::Vec3List(v) => json!(v),
            Self::Quaternion(v) => json!(v),
            Self::Color(v) => json!(v),
            Self::ColorList(v) => json!(v),
            Self::Json(v) => v.clone(),
            Self::Image(image) => json!({
                "width": image.width(),
                "height": image.height(),
                "png": encode_png(image),
            }),
            Self::AudioBuffer(buffer) => json!({
                "sampleRate": buffer.sample_rate,
                "channels": buffer.channels,
                "samples": buffer.samples,
            }),
            Self::AudioNodeHandle(handle) => json!(handle),
            Self::Feature(feature) => serde_json::to_value(feature).unwrap_or(Value::Null),
            Self::FeatureList(features) => serde_json::to_value(features).unwrap_or(Value::Null),
            Self::BodyList(bodies) => serde_json::to_value(bodies).unwrap_or(Value::Null),
        }
    }

    /// Parse a wire value of the given type.
    ///
    /// Images and audio blocks are never accepted from the wire.
    pub fn from_json(port_type: PortType, value: &Value) -> Option<Self> {
        let parsed = match port_type {
            PortType::Bool => Self::Bool(value.as_bool()?),
            PortType::Number => Self::Number(value.as_f64()?),
            PortType::NumberList => Self::NumberList(serde_json::from_value(value.clone()).ok()?),
            PortType::Text => Self::Text(value.as_str()?.to_string()),
            PortType::Vec2 => Self::Vec2(serde_json::from_value(value.clone()).ok()?),
            PortType::Vec2List => Self::Vec2List(serde_json::from_value(value.clone()).ok()?),
            PortType::Vec3 => Self::Vec3(serde_json::from_value(value.clone()).ok()?),
            PortType::Vec3List => Self::Vec3List(serde_json::from_value(value.clone()).ok()?),
            PortType::Quaternion => Self::Quaternion(serde_json::from_value(value.clone()).ok()?),
            PortType::Color => Self::Color(serde_json::from_value(value.clone()).ok()?),
            PortType::ColorList => Self::ColorList(serde_json::from_value(value.clone()).ok()?),
            PortType::Json => Self::Json(value.clone()),
            PortType::AudioNodeHandle => Self::AudioNodeHandle(value.as_u64()?),
            PortType::Feature => Self::Feature(serde_json::from_value(value.clone()).ok()?),
            PortType::FeatureList => Self::FeatureList(serde_json::from_value(value.clone()).ok()?),
            PortType::BodyList => Self::BodyList(serde_json::from_value(value.clone()).ok()?),
            PortType::Image | PortType::AudioBuffer | PortType::Generic => return None,
        };
        Some(parsed)
    }
}

fn encode_png(image: &image::DynamicImage) -> Option<String> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .ok()?;
    Some(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for port_type in PortType::CONCRETE {
            assert_eq!(PortType::from_name(port_type.as_str()), Some(port_type));
        }
        assert_eq!(PortType::from_name("generic"), Some(PortType::Generic));
        assert_eq!(PortType::from_name("nope"), None);
    }

    #[test]
    fn test_serde_names_match_wire_names() {
        let encoded = serde_json::to_value(PortType::AudioNodeHandle).unwrap();
        assert_eq!(encoded, json!("audioNodeHandle"));
    }

    #[test]
    fn test_value_reports_type() {
        assert_eq!(PortValue::Number(1.0).port_type(), PortType::Number);
        assert_eq!(PortValue::Color([1.0; 4]).port_type(), PortType::Color);
        assert_eq!(PortValue::BodyList(vec![]).port_type(), PortType::BodyList);
    }

    #[test]
    fn test_from_json_rejects_wrong_shape() {
        assert!(PortValue::from_json(PortType::Number, &json!("x")).is_none());
        assert!(PortValue::from_json(PortType::Vec2, &json!([1.0])).is_none());
        assert!(PortValue::from_json(PortType::Image, &json!({})).is_none());
        let v = PortValue::from_json(PortType::Vec3, &json!([1.0, 2.0, 3.0])).unwrap();
        assert_eq!(v.to_json(), json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_image_json_has_dimensions() {
        let image = image::DynamicImage::new_rgba8(4, 2);
        let json = PortValue::Image(Arc::new(image)).to_json();
        assert_eq!(json["width"], 4);
        assert_eq!(json["height"], 2);
        assert!(json["png"].is_string());
    }

    #[test]
    fn test_audio_frames() {
        let buffer = AudioBuffer { sample_rate: 48_000, channels: 2, samples: vec![0.0; 8] };
        assert_eq!(buffer.frames(), 4);
    }
}
