//! Fare computation: pricing plans per vehicle type and the fare formula.

use crate::domain::{Money, VehicleType};
use serde::{Deserialize, Serialize};

/// Pricing plan for one vehicle type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPlan {
    pub vehicle_type: VehicleType,
    pub base_fare: Money,
    pub per_km: Money,
    pub per_minute: Money,
    pub min_fare: Money,
}

impl PricingPlan {
    /// Seed plans used when the pricing table is empty.
    pub fn defaults() -> Vec<PricingPlan> {
        vec![
            PricingPlan {
                vehicle_type: VehicleType::Economy,
                base_fare: Money::from_i64(40),
                per_km: Money::from_i64(15),
                per_minute: Money::from_i64(2),
                min_fare: Money::from_i64(40),
            },
            PricingPlan {
                vehicle_type: VehicleType::Premium,
                base_fare: Money::from_i64(60),
                per_km: Money::from_i64(20),
                per_minute: Money::from_i64(3),
                min_fare: Money::from_i64(60),
            },
            PricingPlan {
                vehicle_type: VehicleType::Xl,
                base_fare: Money::from_i64(80),
                per_km: Money::from_i64(25),
                per_minute: Money::from_i64(4),
                min_fare: Money::from_i64(80),
            },
        ]
    }
}

/// Itemized fare for a ride. Persisted with the ride and returned to both
/// parties on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareBreakdown {
    pub base_fare: Money,
    pub distance_fare: Money,
    pub duration_fare: Money,
    pub total_fare: Money,
    pub discount: Money,
    pub final_fare: Money,
}

impl FareBreakdown {
    /// Apply the fare formula:
    /// `total = max(base + distance_km * per_km + (duration_secs / 60) * per_minute, min)`,
    /// each component rounded to two decimal places.
    ///
    /// Returns `None` if distance/duration are not representable (NaN,
    /// infinite, negative).
    pub fn compute(plan: &PricingPlan, distance_km: f64, duration_secs: f64) -> Option<Self> {
        if distance_km < 0.0 || duration_secs < 0.0 {
            return None;
        }
        let distance = Money::from_f64(distance_km)?;
        let minutes = Money::from_f64(duration_secs / 60.0)?;

        let distance_fare = (distance * plan.per_km).rounded();
        let duration_fare = (minutes * plan.per_minute).rounded();
        let total_fare = (plan.base_fare + distance_fare + duration_fare)
            .max(plan.min_fare)
            .rounded();

        Some(FareBreakdown {
            base_fare: plan.base_fare,
            distance_fare,
            duration_fare,
            total_fare,
            discount: Money::zero(),
            final_fare: total_fare,
        })
    }

    /// Replace the final fare (e.g. an operator override at completion),
    /// keeping the computed breakdown intact.
    pub fn with_final_fare(mut self, final_fare: Money) -> Self {
        self.final_fare = final_fare.rounded();
        self
    }
}
