use std::fmt;

use garde::Validate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::models::job::{AnalysisJob, AnalysisType, JobStatus};
use crate::models::result::{
    AnalysisResult, ColorAnalysis, DominantColor, ObjectDetection, VegetationHealth,
    VegetationIndex,
};

/// Display-ready output of a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Visualization {
    ColorDistribution(ColorDistribution),
    ClassFrequency(ClassFrequency),
    VegetationSummary(VegetationSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorSlice {
    pub channel: &'static str,
    pub value: f64,
    /// Percentage of the r+g+b total.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorDistribution {
    pub slices: Vec<ColorSlice>,
    pub dominant: DominantColor,
}

impl ColorDistribution {
    pub fn values(&self) -> Vec<f64> {
        self.slices.iter().map(|slice| slice.value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub class_name: String,
    pub count: usize,
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassFrequency {
    /// Classes in first-seen order.
    pub classes: Vec<ClassCount>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VegetationSummary {
    pub ndvi_average: f64,
    pub health: VegetationHealth,
    pub coverage_percentage: f64,
}

/// Turns one payload variant into something displayable.
pub trait Renderer<P>: Send + Sync {
    fn render(&self, payload: &P) -> Visualization;
}

/// Three-slice r/g/b breakdown.
pub struct ColorDistributionRenderer;

impl Renderer<ColorAnalysis> for ColorDistributionRenderer {
    fn render(&self, payload: &ColorAnalysis) -> Visualization {
        let rgb = payload.average_color;
        let total = rgb.r + rgb.g + rgb.b;
        let share = |value: f64| if total > 0.0 { value / total * 100.0 } else { 0.0 };

        let slices = [("red", rgb.r), ("green", rgb.g), ("blue", rgb.b)]
            .into_iter()
            .map(|(channel, value)| ColorSlice {
                channel,
                value,
                share: share(value),
            })
            .collect();

        Visualization::ColorDistribution(ColorDistribution {
            slices,
            dominant: payload.dominant_color,
        })
    }
}

/// Per-class detection counts.
pub struct ClassFrequencyRenderer;

impl Renderer<ObjectDetection> for ClassFrequencyRenderer {
    fn render(&self, payload: &ObjectDetection) -> Visualization {
        let mut classes: Vec<(String, usize, f64)> = Vec::new();

        for object in &payload.objects_detected {
            match classes.iter_mut().find(|(name, _, _)| *name == object.class_name) {
                Some((_, count, confidence_sum)) => {
                    *count += 1;
                    *confidence_sum += object.confidence;
                }
                None => classes.push((object.class_name.clone(), 1, object.confidence)),
            }
        }

        if payload.count as usize != payload.objects_detected.len() {
            warn!(
                reported = payload.count,
                listed = payload.objects_detected.len(),
                "Detection count does not match listed objects"
            );
        }

        Visualization::ClassFrequency(ClassFrequency {
            classes: classes
                .into_iter()
                .map(|(class_name, count, confidence_sum)| ClassCount {
                    class_name,
                    count,
                    mean_confidence: confidence_sum / count as f64,
                })
                .collect(),
            total: payload.count,
        })
    }
}

pub struct VegetationSummaryRenderer;

impl Renderer<VegetationIndex> for VegetationSummaryRenderer {
    fn render(&self, payload: &VegetationIndex) -> Visualization {
        Visualization::VegetationSummary(VegetationSummary {
            ndvi_average: payload.ndvi_average,
            health: payload.vegetation_health,
            coverage_percentage: payload.coverage_percentage,
        })
    }
}

/// Routes a completed job's payload to the renderer for its analysis type.
pub struct ResultDispatcher {
    color: Box<dyn Renderer<ColorAnalysis>>,
    objects: Box<dyn Renderer<ObjectDetection>>,
    vegetation: Box<dyn Renderer<VegetationIndex>>,
}

impl Default for ResultDispatcher {
    fn default() -> Self {
        Self {
            color: Box::new(ColorDistributionRenderer),
            objects: Box::new(ClassFrequencyRenderer),
            vegetation: Box::new(VegetationSummaryRenderer),
        }
    }
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color_renderer(mut self, renderer: impl Renderer<ColorAnalysis> + 'static) -> Self {
        self.color = Box::new(renderer);
        self
    }

    pub fn with_object_renderer(
        mut self,
        renderer: impl Renderer<ObjectDetection> + 'static,
    ) -> Self {
        self.objects = Box::new(renderer);
        self
    }

    pub fn with_vegetation_renderer(
        mut self,
        renderer: impl Renderer<VegetationIndex> + 'static,
    ) -> Self {
        self.vegetation = Box::new(renderer);
        self
    }

    /// Render a result payload on its own.
    pub fn dispatch(&self, payload: &Value) -> Result<Visualization, ClientError> {
        let result = resolve(payload, None)?;
        Ok(self.render(&result))
    }

    /// Render a job's result. The job must have completed; when the payload
    /// carries no `analysis_type`, the job's own type is tried before field
    /// inference.
    pub fn dispatch_job(&self, job: &AnalysisJob) -> Result<Visualization, ClientError> {
        if job.status != JobStatus::Completed {
            return Err(ClientError::JobNotCompleted {
                job_id: job.id.clone(),
                status: job.status,
            });
        }

        let payload = job
            .completed_result()
            .ok_or_else(|| ClientError::UnrecognizedResultType {
                payload: job.result.clone().unwrap_or(Value::Null),
            })?;

        let result = resolve(payload, job.analysis_type)?;
        debug!(job_id = %job.id, analysis_type = %result.analysis_type(), "Dispatching result");
        Ok(self.render(&result))
    }

    fn render(&self, result: &AnalysisResult) -> Visualization {
        match result {
            AnalysisResult::Color(payload) => self.color.render(payload),
            AnalysisResult::Objects(payload) => self.objects.render(payload),
            AnalysisResult::Vegetation(payload) => self.vegetation.render(payload),
        }
    }
}

/// Work out which analysis a payload belongs to and decode it.
///
/// An explicit `analysis_type` field wins. Otherwise `hint` is tried first,
/// then the fields present, checked in the order color → objects → vegetation.
pub fn resolve(payload: &Value, hint: Option<AnalysisType>) -> Result<AnalysisResult, ClientError> {
    let unrecognized = || ClientError::UnrecognizedResultType {
        payload: payload.clone(),
    };

    let fields = payload.as_object().ok_or_else(unrecognized)?;

    match fields.get("analysis_type") {
        Some(Value::String(tag)) => {
            let analysis_type = tag.parse::<AnalysisType>().map_err(|_| unrecognized())?;
            return decode_as(payload, analysis_type).ok_or_else(unrecognized);
        }
        Some(Value::Null) | None => {}
        Some(_) => return Err(unrecognized()),
    }

    if let Some(hinted) = hint {
        if let Some(result) = decode_as(payload, hinted) {
            return Ok(result);
        }
        debug!(hint = %hinted, "Payload does not match the job's analysis type, inferring from fields");
    }

    infer(fields)
        .and_then(|analysis_type| decode_as(payload, analysis_type))
        .ok_or_else(unrecognized)
}

fn decode_as(payload: &Value, analysis_type: AnalysisType) -> Option<AnalysisResult> {
    match analysis_type {
        AnalysisType::ColorAnalysis => decode(payload).map(AnalysisResult::Color),
        AnalysisType::ObjectDetection => decode(payload).map(AnalysisResult::Objects),
        AnalysisType::VegetationIndex => decode(payload).map(AnalysisResult::Vegetation),
    }
}

fn infer(fields: &Map<String, Value>) -> Option<AnalysisType> {
    let present = |key: &str| fields.get(key).is_some_and(|value| !value.is_null());

    if present("average_color") {
        Some(AnalysisType::ColorAnalysis)
    } else if present("objects_detected") {
        Some(AnalysisType::ObjectDetection)
    } else if present("ndvi_average") {
        Some(AnalysisType::VegetationIndex)
    } else {
        None
    }
}

fn decode<T>(payload: &Value) -> Option<T>
where
    T: DeserializeOwned + Validate<Context = ()>,
{
    let decoded: T = match serde_json::from_value(payload.clone()) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "Payload does not match its analysis shape");
            return None;
        }
    };

    match decoded.validate() {
        Ok(()) => Some(decoded),
        Err(report) => {
            debug!(error = %report, "Payload values out of range");
            None
        }
    }
}

impl fmt::Display for Visualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visualization::ColorDistribution(distribution) => {
                writeln!(f, "Color distribution (dominant: {})", distribution.dominant)?;
                for slice in &distribution.slices {
                    writeln!(
                        f,
                        "  {:<6} {:>6.1}  {:>5.1}%",
                        slice.channel, slice.value, slice.share
                    )?;
                }
                Ok(())
            }
            Visualization::ClassFrequency(frequency) => {
                writeln!(f, "Objects detected: {}", frequency.total)?;
                for class in &frequency.classes {
                    writeln!(
                        f,
                        "  {:<16} x{:<3} mean confidence {:.0}%",
                        class.class_name,
                        class.count,
                        class.mean_confidence * 100.0
                    )?;
                }
                Ok(())
            }
            Visualization::VegetationSummary(summary) => {
                writeln!(f, "Vegetation index (NDVI): {:.2}", summary.ndvi_average)?;
                writeln!(f, "  health:   {}", summary.health)?;
                writeln!(f, "  coverage: {:.1}%", summary.coverage_percentage)
            }
        }
    }
}
