//! Exposure resolver
//!
//! Selects the rows that expose an entity to the experiment and resolves the
//! variant each entity ends up in.

use crate::error::Result;
use crate::filters::{
    EVENT_COLUMN, TIMESTAMP_COLUMN, action_predicate, column, event_predicate, properties_expr,
    property_expr, test_account_predicate, timestamp_within,
};
use crate::model::{
    ActionCatalog, DEFAULT_EXPOSURE_EVENT, DateRange, ExposureConfig, ExposureCriteria,
    FEATURE_FLAG_PROPERTY, MULTIPLE_VARIANT_KEY, MultipleVariantHandling, PropertyType,
    TeamSettings,
};
use crate::sql::ast::{
    AggregateFunction, Expr, Function, PropertyKind, agg, agg_if, and, func, if_then, lit_int,
    lit_str,
};

/// Everything needed to resolve exposures for one experiment
pub struct ExposureResolver<'a> {
    /// Exposure criteria (defaults when the experiment has none)
    pub criteria: &'a ExposureCriteria,
    /// Feature flag driving the experiment
    pub feature_flag_key: &'a str,
    /// Canonical variant keys
    pub variants: &'a [String],
    /// Experiment date range
    pub date_range: DateRange,
    /// Saved actions
    pub actions: &'a dyn ActionCatalog,
    /// Team settings (test-account filters)
    pub team: &'a TeamSettings,
}

impl ExposureResolver<'_> {
    /// Predicate selecting qualifying exposure rows
    pub fn predicate(&self, table: Option<&str>) -> Result<Expr> {
        exposure_predicate(
            self.criteria,
            self.variants,
            &self.date_range,
            self.feature_flag_key,
            self.actions,
            self.team,
            table,
        )
    }

    /// Variant carried by one exposure row
    pub fn variant_property(&self, table: Option<&str>) -> Expr {
        property_expr(
            &self.criteria.variant_property(self.feature_flag_key),
            PropertyType::Event,
            PropertyKind::String,
            table,
        )
    }

    /// Per-entity variant, aggregated over exposure rows
    ///
    /// `condition` restricts the aggregation to exposure rows when the
    /// grouped rows also contain metric rows.
    pub fn variant_expression(&self, table: Option<&str>, condition: Option<Expr>) -> Expr {
        variant_assignment_expression(
            self.criteria.multiple_variant_handling,
            self.variant_property(table),
            column(table, TIMESTAMP_COLUMN),
            condition,
        )
    }
}

/// Predicate selecting qualifying exposure rows
///
/// Conjunction of: timestamp inside the date range, the exposure event or
/// action, a variant value in the configured set, the test-account filters
/// and any custom property filters.
pub fn exposure_predicate(
    criteria: &ExposureCriteria,
    variants: &[String],
    date_range: &DateRange,
    feature_flag_key: &str,
    actions: &dyn ActionCatalog,
    team: &TeamSettings,
    table: Option<&str>,
) -> Result<Expr> {
    let mut parts = vec![timestamp_within(column(table, TIMESTAMP_COLUMN), date_range)];

    match criteria.custom_exposure() {
        Some(ExposureConfig::EventsNode(source)) => parts.push(event_predicate(source, table)?),
        Some(ExposureConfig::ActionsNode(source)) => {
            parts.push(action_predicate(source.id, &source.properties, actions, table)?)
        }
        None => {
            parts.push(column(table, EVENT_COLUMN).equals(lit_str(DEFAULT_EXPOSURE_EVENT)));
            parts.push(
                property_expr(
                    FEATURE_FLAG_PROPERTY,
                    PropertyType::Event,
                    PropertyKind::String,
                    table,
                )
                .equals(lit_str(feature_flag_key)),
            );
            // A config naming the default event still contributes its filters
            if let Some(ExposureConfig::EventsNode(source)) = &criteria.exposure_config {
                parts.push(properties_expr(&source.properties, table)?);
            }
        }
    }

    let variant = property_expr(
        &criteria.variant_property(feature_flag_key),
        PropertyType::Event,
        PropertyKind::String,
        table,
    );
    parts.push(variant.in_list(variants.iter().map(|v| lit_str(v.clone())).collect()));

    parts.push(test_account_predicate(
        criteria.filter_test_accounts,
        team,
        table,
    )?);

    Ok(and(parts))
}

/// Variant assignment for one entity under a multiple-variant policy
///
/// `FirstSeen` keeps the variant of the earliest exposure. `Exclude` keeps
/// the variant when all exposures agree and labels the entity
/// `$multiple` otherwise.
pub fn variant_assignment_expression(
    policy: MultipleVariantHandling,
    variant_property: Expr,
    timestamp: Expr,
    condition: Option<Expr>,
) -> Expr {
    let aggregate = |f: AggregateFunction, args: Vec<Expr>| match &condition {
        Some(cond) => agg_if(f, args, cond.clone()),
        None => agg(f, args),
    };

    match policy {
        MultipleVariantHandling::FirstSeen => {
            aggregate(AggregateFunction::ArgMin, vec![variant_property, timestamp])
        }
        MultipleVariantHandling::Exclude => if_then(
            aggregate(AggregateFunction::UniqExact, vec![variant_property.clone()])
                .gt(lit_int(1)),
            lit_str(MULTIPLE_VARIANT_KEY),
            aggregate(AggregateFunction::Any, vec![variant_property]),
        ),
    }
}

/// Earliest qualifying exposure
///
/// With a condition the result is NULL for entities without exposure rows.
pub fn first_exposure_expression(timestamp: Expr, condition: Option<Expr>) -> Expr {
    match condition {
        Some(cond) => agg_if(
            AggregateFunction::Min,
            vec![func(Function::ToNullable, vec![timestamp])],
            cond,
        ),
        None => agg(AggregateFunction::Min, vec![timestamp]),
    }
}

/// Value of the warehouse join key on an exposure row
///
/// `path` is `properties.<key>`, `person.properties.<key>` or an events
/// column such as `distinct_id`.
pub fn join_key_expression(path: &str, table: Option<&str>) -> Expr {
    if let Some(key) = path.strip_prefix("person.properties.") {
        property_expr(key, PropertyType::Person, PropertyKind::String, table)
    } else if let Some(key) = path.strip_prefix("properties.") {
        property_expr(key, PropertyType::Event, PropertyKind::String, table)
    } else {
        column(table, path)
    }
}

/// Join identifier taken from the entity's earliest exposure
pub fn exposure_identifier_expression(
    path: &str,
    table: Option<&str>,
    condition: Option<Expr>,
) -> Expr {
    let args = vec![join_key_expression(path, table), column(table, TIMESTAMP_COLUMN)];
    match condition {
        Some(cond) => agg_if(AggregateFunction::ArgMin, args, cond),
        None => agg(AggregateFunction::ArgMin, args),
    }
}

#[cfg(test)]
#[path = "exposure_test.rs"]
mod exposure_test;
