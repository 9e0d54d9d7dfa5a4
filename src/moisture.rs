//! Soil Moisture & Irrigation Advisor
//!
//! A piecewise-linear NDMI to soil-moisture estimate and a fixed-order
//! decision table for irrigation advice. Both work on mean index values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoistureEstimate {
    /// 0-100, rounded to two decimals
    pub moisture_percentage: f64,
    pub category: String,
    pub unit: String,
    pub confidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRecommendation {
    pub recommendation: String,
    pub priority: Priority,
    pub action: String,
    pub reason: String,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Estimate soil moisture from mean NDMI. Above -0.5 each branch meets its
/// neighbour at the boundary; below it the estimate is a flat 10%.
pub fn estimate_moisture(ndmi: f64) -> MoistureEstimate {
    let (percentage, category) = if ndmi < -0.5 {
        (10.0, "Very Dry")
    } else if ndmi < 0.0 {
        (20.0 + (ndmi + 0.5) * 40.0, "Dry")
    } else if ndmi < 0.3 {
        (40.0 + ndmi * 66.67, "Moderate")
    } else if ndmi < 0.5 {
        (60.0 + (ndmi - 0.3) * 100.0, "Moist")
    } else {
        (80.0 + (ndmi - 0.5) * 40.0, "Very Moist")
    };

    MoistureEstimate {
        moisture_percentage: round2(percentage),
        category: category.to_string(),
        unit: "percentage".to_string(),
        confidence: "estimated".to_string(),
    }
}

/// Irrigation advice from mean NDMI and NDVI. Rules are checked in order and
/// the first match wins.
pub fn irrigation_recommendation(ndmi: f64, ndvi: f64) -> IrrigationRecommendation {
    let (recommendation, priority, action, reason) = if ndmi < 0.0 && ndvi < 0.4 {
        (
            "Immediate irrigation required",
            Priority::High,
            "Irrigate within 24 hours",
            "Low moisture and vegetation stress detected",
        )
    } else if ndmi < 0.1 && ndvi >= 0.4 {
        (
            "Schedule irrigation soon",
            Priority::Medium,
            "Irrigate within 2-3 days",
            "Moisture levels declining",
        )
    } else if ndmi >= 0.2 && ndvi >= 0.4 {
        (
            "No irrigation needed",
            Priority::Low,
            "Monitor regularly",
            "Adequate moisture and healthy vegetation",
        )
    } else if ndmi >= 0.2 && ndvi < 0.4 {
        (
            "Check for other issues",
            Priority::Medium,
            "Inspect for pests or disease",
            "Good moisture but poor vegetation health",
        )
    } else {
        (
            "Maintain current irrigation",
            Priority::Low,
            "Continue monitoring",
            "Conditions are stable",
        )
    };

    IrrigationRecommendation {
        recommendation: recommendation.to_string(),
        priority,
        action: action.to_string(),
        reason: reason.to_string(),
    }
}
