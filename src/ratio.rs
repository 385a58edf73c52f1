//! Ratio formula evaluation.
//!
//! A ratio is three independent pools (numerator, denominator, operand) of
//! concept amounts, each folded in ascending component order:
//!
//! ```text
//! value = (numerator * numerator_multiplier + operand)
//!         / (denominator * denominator_multiplier)
//!         * result_multiplier
//! ```

use crate::config::{DenominatorPolicy, EngineConfig};
use crate::error::{DerivationError, Result};
use crate::ports::{ConceptAmountResolver, PeriodRepository, PeriodSelector, RatioValueSink};
use crate::schema::{
    ComponentRole, Operation, Period, RatioComponent, RatioDefinition, RatioValue, ValueSource,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentBreakdown {
    pub concept_id: u64,
    pub role: ComponentRole,
    pub order: i32,
    pub operation: Operation,
    pub factor: Option<f64>,
    pub requires_averaging: bool,
    pub current_amount: f64,
    /// Amount of the prior-year period; `None` when not averaged or no such period exists.
    pub previous_amount: Option<f64>,
    pub resolved_amount: f64,
    /// `resolved_amount` after the component factor.
    pub scaled_amount: f64,
    /// Pool total after this component was folded in.
    pub running_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioEvaluation {
    pub ratio_id: u64,
    pub ratio_code: String,
    pub company_id: u64,
    pub period_id: u64,
    pub value: f64,
    pub numerator_total: f64,
    pub denominator_total: f64,
    pub operand_total: f64,
    /// True when the ratio had no denominator and the legacy policy substituted 1.0.
    pub denominator_defaulted: bool,
    pub components: Vec<ComponentBreakdown>,
}

impl RatioEvaluation {
    pub fn to_ratio_value(&self) -> RatioValue {
        RatioValue {
            company_id: self.company_id,
            period_id: self.period_id,
            ratio_id: self.ratio_id,
            value: self.value,
            source: ValueSource::Computed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioFailure {
    pub ratio_id: u64,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BulkRatioReport {
    pub computed: Vec<RatioValue>,
    pub failures: Vec<RatioFailure>,
}

impl BulkRatioReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct PoolTotal {
    total: f64,
    is_empty: bool,
}

pub struct RatioEvaluator<'a, R: ?Sized, P: ?Sized> {
    resolver: &'a R,
    periods: &'a P,
    division_epsilon: f64,
    denominator_policy: DenominatorPolicy,
}

impl<'a, R, P> RatioEvaluator<'a, R, P>
where
    R: ConceptAmountResolver + ?Sized,
    P: PeriodRepository + ?Sized,
{
    pub fn new(resolver: &'a R, periods: &'a P, config: &EngineConfig) -> Self {
        Self {
            resolver,
            periods,
            division_epsilon: config.division_epsilon,
            denominator_policy: config.denominator_policy,
        }
    }

    pub fn evaluate_for(
        &self,
        ratio: &RatioDefinition,
        company_id: u64,
        selector: PeriodSelector,
    ) -> Result<RatioEvaluation> {
        let period = self.periods.resolve(selector)?;
        self.evaluate(ratio, company_id, &period)
    }

    pub fn evaluate(
        &self,
        ratio: &RatioDefinition,
        company_id: u64,
        period: &Period,
    ) -> Result<RatioEvaluation> {
        if ratio.components.is_empty() {
            return Err(DerivationError::EmptyRatio(ratio.code.clone()));
        }

        let previous = if ratio.components.iter().any(|c| c.requires_averaging) {
            let previous = self.periods.previous_year(period)?;
            if previous.is_none() {
                debug!(
                    "Ratio {}: no period before {}, averaged components use the current amount",
                    ratio.code, period.year
                );
            }
            previous
        } else {
            None
        };

        // Stable sort keeps the authored sequence for equal orders.
        let mut ordered: Vec<&RatioComponent> = ratio.components.iter().collect();
        ordered.sort_by_key(|c| c.order);

        let mut breakdown = Vec::with_capacity(ordered.len());
        for component in ordered {
            let step = self.resolve_component(component, company_id, period, previous.as_ref())?;
            breakdown.push(step);
        }

        let numerator = self.fold_pool(&ratio.code, ComponentRole::Numerator, &mut breakdown)?;
        let denominator = self.fold_pool(&ratio.code, ComponentRole::Denominator, &mut breakdown)?;
        let operand = self.fold_pool(&ratio.code, ComponentRole::Operand, &mut breakdown)?;

        let denominator_defaulted =
            denominator.is_empty && self.denominator_policy == DenominatorPolicy::DefaultToOne;
        let denominator_total = if denominator_defaulted { 1.0 } else { denominator.total };

        let numerator_multiplier = ratio.numerator_multiplier.unwrap_or(1.0);
        let denominator_multiplier = ratio.denominator_multiplier.unwrap_or(1.0);
        let result_multiplier = ratio.result_multiplier.unwrap_or(1.0);

        let divisor = denominator_total * denominator_multiplier;
        if divisor.abs() < self.division_epsilon {
            return Err(DerivationError::DivisionByZero {
                ratio: ratio.code.clone(),
                pool: ComponentRole::Denominator.to_string(),
            });
        }

        let value =
            (numerator.total * numerator_multiplier + operand.total) / divisor * result_multiplier;
        debug!(
            "Ratio {} = ({} * {} + {}) / ({} * {}) * {} = {}",
            ratio.code,
            numerator.total,
            numerator_multiplier,
            operand.total,
            denominator_total,
            denominator_multiplier,
            result_multiplier,
            value
        );

        Ok(RatioEvaluation {
            ratio_id: ratio.id,
            ratio_code: ratio.code.clone(),
            company_id,
            period_id: period.id,
            value,
            numerator_total: numerator.total,
            denominator_total,
            operand_total: operand.total,
            denominator_defaulted,
            components: breakdown,
        })
    }

    fn resolve_component(
        &self,
        component: &RatioComponent,
        company_id: u64,
        period: &Period,
        previous: Option<&Period>,
    ) -> Result<ComponentBreakdown> {
        let current_amount = self
            .resolver
            .concept_amount(component.concept_id, company_id, period.id)?;

        let previous_amount = match (component.requires_averaging, previous) {
            (true, Some(previous)) => Some(
                self.resolver
                    .concept_amount(component.concept_id, company_id, previous.id)?,
            ),
            _ => None,
        };

        let resolved_amount = match previous_amount {
            Some(previous_amount) => (current_amount + previous_amount) / 2.0,
            None => current_amount,
        };
        let scaled_amount = resolved_amount * component.factor.unwrap_or(1.0);

        Ok(ComponentBreakdown {
            concept_id: component.concept_id,
            role: component.role,
            order: component.order,
            operation: component.operation,
            factor: component.factor,
            requires_averaging: component.requires_averaging,
            current_amount,
            previous_amount,
            resolved_amount,
            scaled_amount,
            running_total: 0.0,
        })
    }

    fn fold_pool(
        &self,
        ratio_code: &str,
        role: ComponentRole,
        breakdown: &mut [ComponentBreakdown],
    ) -> Result<PoolTotal> {
        let mut total: Option<f64> = None;

        for step in breakdown.iter_mut().filter(|step| step.role == role) {
            let amount = step.scaled_amount;
            let next = match total {
                None => match step.operation {
                    Operation::Sub => -amount,
                    Operation::Add | Operation::Mul | Operation::Div => amount,
                },
                Some(running) => match step.operation {
                    Operation::Add => running + amount,
                    Operation::Sub => running - amount,
                    Operation::Mul => running * amount,
                    Operation::Div => {
                        if amount.abs() < self.division_epsilon {
                            return Err(DerivationError::DivisionByZero {
                                ratio: ratio_code.to_string(),
                                pool: role.to_string(),
                            });
                        }
                        running / amount
                    }
                },
            };
            debug!(
                "Ratio {} {}: concept {} {:?} {} -> {}",
                ratio_code, role, step.concept_id, step.operation, amount, next
            );
            step.running_total = next;
            total = Some(next);
        }

        Ok(PoolTotal {
            total: total.unwrap_or(0.0),
            is_empty: total.is_none(),
        })
    }

    /// Computes every active ratio for one company and period, persisting each
    /// success. A failing ratio is recorded and the batch moves on.
    pub fn compute_all<S>(
        &self,
        ratios: &[RatioDefinition],
        company_id: u64,
        selector: PeriodSelector,
        sink: &S,
    ) -> Result<BulkRatioReport>
    where
        S: RatioValueSink + ?Sized,
    {
        let period = self.periods.resolve(selector).map_err(|e| {
            e.in_operation("Ratio batch", company_id, selector.to_string(), "period resolution")
        })?;

        let active: Vec<&RatioDefinition> = ratios.iter().filter(|r| r.active).collect();
        info!(
            "Computing {} active ratios for company {} in period {} ({})",
            active.len(),
            company_id,
            period.id,
            period.year
        );

        let mut report = BulkRatioReport::default();
        for ratio in active {
            let stored = self.evaluate(ratio, company_id, &period).and_then(|evaluation| {
                let value = evaluation.to_ratio_value();
                sink.store_ratio_value(value.clone())?;
                Ok(value)
            });

            match stored {
                Ok(value) => report.computed.push(value),
                Err(e) => {
                    warn!("Ratio {} not computed for company {}: {}", ratio.code, company_id, e);
                    report.failures.push(RatioFailure {
                        ratio_id: ratio.id,
                        code: ratio.code.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Ratio batch done: {} computed, {} failed",
            report.computed.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
