use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::job::AnalysisType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct Rgb {
    #[garde(range(min = 0.0, max = 255.0))]
    pub r: f64,
    #[garde(range(min = 0.0, max = 255.0))]
    pub g: f64,
    #[garde(range(min = 0.0, max = 255.0))]
    pub b: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DominantColor {
    Red,
    Green,
    Blue,
}

/// Payload of a `color_analysis` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ColorAnalysis {
    #[garde(dive)]
    pub average_color: Rgb,
    #[garde(skip)]
    pub dominant_color: DominantColor,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DetectedObject {
    #[serde(rename = "class")]
    #[garde(length(min = 1))]
    pub class_name: String,
    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

/// Payload of an `object_detection` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObjectDetection {
    #[garde(dive)]
    pub objects_detected: Vec<DetectedObject>,
    #[garde(skip)]
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VegetationHealth {
    Healthy,
    Moderate,
    Poor,
}

/// Payload of a `vegetation_index` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct VegetationIndex {
    #[garde(skip)]
    pub ndvi_average: f64,
    #[garde(skip)]
    pub vegetation_health: VegetationHealth,
    #[garde(range(min = 0.0, max = 100.0))]
    pub coverage_percentage: f64,
}

/// A result payload resolved to exactly one analysis variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Color(ColorAnalysis),
    Objects(ObjectDetection),
    Vegetation(VegetationIndex),
}

impl AnalysisResult {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            AnalysisResult::Color(_) => AnalysisType::ColorAnalysis,
            AnalysisResult::Objects(_) => AnalysisType::ObjectDetection,
            AnalysisResult::Vegetation(_) => AnalysisType::VegetationIndex,
        }
    }
}
