use crate::error::{FinancialIngestError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identity field every extraction must carry; not listed in [`FieldSchema::fields`].
pub const COMPANY_FIELD: &str = "company_name";
/// Identity field every extraction must carry; not listed in [`FieldSchema::fields`].
pub const YEAR_FIELD: &str = "year";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum FieldKind {
    #[schemars(description = "A currency amount in whole units (not thousands or millions)")]
    Monetary,

    #[schemars(description = "A percentage expressed in percent units (12.5 means 12.5%)")]
    Percentage,

    #[schemars(description = "A unitless number such as a count or a turnover ratio")]
    Number,

    #[schemars(description = "Free text, kept verbatim after trimming")]
    Text,

    #[schemars(description = "A four digit calendar or fiscal year")]
    Year,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Monetary | Self::Percentage | Self::Number)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Monetary => "monetary amount",
            Self::Percentage => "percentage",
            Self::Number => "number",
            Self::Text => "text",
            Self::Year => "year",
        }
    }
}

/// Which direction of change counts as an improvement when comparing periods.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Polarity {
    #[default]
    #[schemars(description = "An increase is an improvement (revenue, profit, assets)")]
    HigherIsBetter,

    #[schemars(description = "A decrease is an improvement (costs, liabilities, churn)")]
    LowerIsBetter,
}

impl Polarity {
    pub fn sign(self) -> f64 {
        match self {
            Self::HigherIsBetter => 1.0,
            Self::LowerIsBetter => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct FieldRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl FieldRange {
    pub fn non_negative() -> Self {
        Self {
            min: Some(0.0),
            max: None,
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Arithmetic over other fields of the same record. Kept as data so new statement
/// types only need a new schema, never new validator code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Formula {
    Difference { minuend: String, subtrahend: String },
    Sum { terms: Vec<String> },
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default = "default_ratio_scale")]
        scale: f64,
    },
    Scaled { source: String, factor: f64 },
}

fn default_ratio_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormulaOutcome {
    Computed(f64),
    /// At least one input is absent from the record.
    MissingInputs,
    /// Inputs are present but the result is undefined (zero denominator).
    Undefined,
}

impl Formula {
    pub fn difference(minuend: &str, subtrahend: &str) -> Self {
        Self::Difference {
            minuend: minuend.to_string(),
            subtrahend: subtrahend.to_string(),
        }
    }

    pub fn sum(terms: &[&str]) -> Self {
        Self::Sum {
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn percent_of(numerator: &str, denominator: &str) -> Self {
        Self::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            scale: 100.0,
        }
    }

    pub fn scaled(source: &str, factor: f64) -> Self {
        Self::Scaled {
            source: source.to_string(),
            factor,
        }
    }

    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Difference {
                minuend,
                subtrahend,
            } => vec![minuend.as_str(), subtrahend.as_str()],
            Self::Sum { terms } => terms.iter().map(String::as_str).collect(),
            Self::Ratio {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
            Self::Scaled { source, .. } => vec![source.as_str()],
        }
    }

    pub fn evaluate(&self, values: &BTreeMap<String, f64>) -> FormulaOutcome {
        let mut inputs = Vec::new();
        for name in self.inputs() {
            match values.get(name) {
                Some(&v) => inputs.push(v),
                None => return FormulaOutcome::MissingInputs,
            }
        }

        match self {
            Self::Difference { .. } => FormulaOutcome::Computed(inputs[0] - inputs[1]),
            Self::Sum { .. } => FormulaOutcome::Computed(inputs.iter().sum()),
            Self::Ratio { scale, .. } => {
                if inputs[1] == 0.0 {
                    FormulaOutcome::Undefined
                } else {
                    FormulaOutcome::Computed(inputs[0] / inputs[1] * scale)
                }
            }
            Self::Scaled { factor, .. } => FormulaOutcome::Computed(inputs[0] * factor),
        }
    }

    /// Human readable form used in prompts and violation messages, e.g. `revenue - cogs`.
    pub fn describe(&self) -> String {
        match self {
            Self::Difference {
                minuend,
                subtrahend,
            } => format!("{} - {}", minuend, subtrahend),
            Self::Sum { terms } => terms.join(" + "),
            Self::Ratio {
                numerator,
                denominator,
                scale,
            } if *scale == 1.0 => format!("{} / {}", numerator, denominator),
            Self::Ratio {
                numerator,
                denominator,
                scale,
            } => format!("{} / {} * {}", numerator, denominator, scale),
            Self::Scaled { source, factor } => format!("{} * {}", source, factor),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct DerivedField {
    pub formula: Formula,

    #[serde(default)]
    #[schemars(
        description = "Relative tolerance for the extracted value against the recomputed one (0.01 = 1%). Falls back to the validator default when absent."
    )]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FieldSpec {
    #[schemars(description = "Snake case key used in extraction responses and stored records")]
    pub name: String,

    pub kind: FieldKind,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub range: Option<FieldRange>,

    #[serde(default)]
    pub polarity: Polarity,

    #[serde(default)]
    #[schemars(
        description = "When set, the stored value is always recomputed from this formula; the extracted value is only checked against it"
    )]
    pub derived: Option<DerivedField>,

    #[serde(default)]
    #[schemars(description = "Synonyms and hints shown to the model, e.g. 'Net Sales, Total Sales'")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            range: None,
            polarity: Polarity::HigherIsBetter,
            derived: None,
            description: None,
        }
    }

    pub fn monetary(name: &str) -> Self {
        Self::new(name, FieldKind::Monetary)
    }

    pub fn percentage(name: &str) -> Self {
        Self::new(name, FieldKind::Percentage)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.range = Some(FieldRange::non_negative());
        self
    }

    pub fn within(mut self, min: f64, max: f64) -> Self {
        self.range = Some(FieldRange::between(min, max));
        self
    }

    pub fn lower_is_better(mut self) -> Self {
        self.polarity = Polarity::LowerIsBetter;
        self
    }

    pub fn derived(mut self, formula: Formula) -> Self {
        self.derived = Some(DerivedField {
            formula,
            tolerance: None,
        });
        self
    }

    pub fn derived_with_tolerance(mut self, formula: Formula, tolerance: f64) -> Self {
        self.derived = Some(DerivedField {
            formula,
            tolerance: Some(tolerance),
        });
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FieldSchema {
    #[schemars(description = "Statement type, e.g. 'general', 'saas', 'retail'")]
    pub name: String,

    #[schemars(description = "Externally managed version tag recorded on every validated record")]
    pub version: String,

    pub fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new(name: &str, version: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn numeric_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind.is_numeric())
    }

    pub fn polarity_of(&self, name: &str) -> Polarity {
        self.field(name).map(|f| f.polarity).unwrap_or_default()
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Checks names are unique, formulas only reference numeric fields of this schema,
    /// and derivations are acyclic. Returns the derived fields in evaluation order.
    pub fn derivation_order(&self) -> Result<Vec<&FieldSpec>> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.name == COMPANY_FIELD || field.name == YEAR_FIELD {
                return Err(self.schema_error(format!(
                    "'{}' is an identity field and cannot be redeclared",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(self.schema_error(format!("duplicate field '{}'", field.name)));
            }
        }

        for field in &self.fields {
            if let Some(derived) = &field.derived {
                if !field.kind.is_numeric() {
                    return Err(self.schema_error(format!(
                        "derived field '{}' must be numeric",
                        field.name
                    )));
                }
                for input in derived.formula.inputs() {
                    match self.field(input) {
                        Some(spec) if spec.kind.is_numeric() => {}
                        Some(_) => {
                            return Err(self.schema_error(format!(
                                "formula for '{}' references non-numeric field '{}'",
                                field.name, input
                            )))
                        }
                        None => {
                            return Err(self.schema_error(format!(
                                "formula for '{}' references unknown field '{}'",
                                field.name, input
                            )))
                        }
                    }
                }
            }
        }

        let mut pending: Vec<&FieldSpec> =
            self.fields.iter().filter(|f| f.derived.is_some()).collect();
        let mut resolved: BTreeSet<&str> = self
            .fields
            .iter()
            .filter(|f| f.derived.is_none())
            .map(|f| f.name.as_str())
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let before = pending.len();
            let mut index = 0;
            while index < pending.len() {
                let ready = pending[index]
                    .derived
                    .as_ref()
                    .map(|d| d.formula.inputs().iter().all(|i| resolved.contains(i)))
                    .unwrap_or(true);
                if ready {
                    let field = pending.remove(index);
                    resolved.insert(field.name.as_str());
                    order.push(field);
                } else {
                    index += 1;
                }
            }
            if pending.len() == before {
                let names: Vec<&str> = pending.iter().map(|f| f.name.as_str()).collect();
                return Err(self.schema_error(format!(
                    "circular derivation between {}",
                    names.join(", ")
                )));
            }
        }

        Ok(order)
    }

    fn schema_error(&self, details: String) -> FinancialIngestError {
        FinancialIngestError::SchemaError {
            schema: self.name.clone(),
            details,
        }
    }

    /// Income statement and balance sheet fields shared by every industry.
    pub fn general() -> Self {
        Self::new(
            "general",
            "1",
            vec![
                FieldSpec::monetary("revenue")
                    .required()
                    .non_negative()
                    .describe("Total Revenue, Net Sales, Sales Revenue, Total Sales"),
                FieldSpec::monetary("cogs")
                    .non_negative()
                    .lower_is_better()
                    .describe("Cost of Goods Sold, Cost of Sales, Cost of Revenue"),
                FieldSpec::monetary("gross_profit")
                    .derived(Formula::difference("revenue", "cogs"))
                    .describe("Gross Profit, Gross Income, Gross Margin (amount)"),
                FieldSpec::monetary("operating_expenses")
                    .non_negative()
                    .lower_is_better()
                    .describe("Operating Expenses, Operating Costs, SG&A, General and Administrative"),
                FieldSpec::monetary("operating_income")
                    .derived(Formula::difference("gross_profit", "operating_expenses"))
                    .describe("Operating Income, Operating Profit, EBIT, Income from Operations"),
                FieldSpec::monetary("net_income")
                    .required()
                    .describe("Net Income, Net Profit, Net Earnings, Profit After Tax"),
                FieldSpec::monetary("total_assets")
                    .non_negative()
                    .describe("Total Assets, Sum of Assets"),
                FieldSpec::monetary("total_liabilities")
                    .non_negative()
                    .lower_is_better()
                    .describe("Total Liabilities, Total Debt"),
                FieldSpec::monetary("equity")
                    .derived(Formula::difference("total_assets", "total_liabilities"))
                    .describe("Shareholders' Equity, Stockholders' Equity, Net Worth"),
                FieldSpec::percentage("gross_margin")
                    .derived(Formula::percent_of("gross_profit", "revenue"))
                    .describe("Gross Profit Margin %"),
                FieldSpec::percentage("operating_margin")
                    .derived(Formula::percent_of("operating_income", "revenue"))
                    .describe("Operating Margin %"),
                FieldSpec::percentage("net_margin")
                    .derived(Formula::percent_of("net_income", "revenue"))
                    .describe("Net Profit Margin %"),
            ],
        )
    }

    pub fn saas() -> Self {
        let mut schema = Self::general();
        schema.name = "saas".to_string();
        schema
            .with_field(
                FieldSpec::monetary("recurring_revenue")
                    .non_negative()
                    .describe("Recurring Revenue, Subscription Revenue"),
            )
            .with_field(
                FieldSpec::monetary("monthly_recurring_revenue")
                    .non_negative()
                    .describe("MRR, Monthly Recurring Revenue"),
            )
            .with_field(
                FieldSpec::monetary("annual_recurring_revenue")
                    .derived_with_tolerance(Formula::scaled("monthly_recurring_revenue", 12.0), 0.05)
                    .describe("ARR, Annual Recurring Revenue"),
            )
            .with_field(
                FieldSpec::monetary("customer_acquisition_cost")
                    .non_negative()
                    .lower_is_better()
                    .describe("CAC, Customer Acquisition Cost"),
            )
            .with_field(
                FieldSpec::monetary("customer_lifetime_value")
                    .non_negative()
                    .describe("LTV, Customer Lifetime Value"),
            )
            .with_field(
                FieldSpec::percentage("churn_rate")
                    .within(0.0, 100.0)
                    .lower_is_better()
                    .describe("Monthly churn rate %, Customer Churn"),
            )
    }

    pub fn retail() -> Self {
        let mut schema = Self::general();
        schema.name = "retail".to_string();
        schema
            .with_field(
                FieldSpec::monetary("same_store_sales").describe("Same Store Sales (SSS)"),
            )
            .with_field(
                FieldSpec::monetary("comparable_store_sales")
                    .describe("Comparable Store Sales, Comp Sales"),
            )
            .with_field(
                FieldSpec::monetary("inventory")
                    .non_negative()
                    .describe("Inventory, Merchandise Inventory"),
            )
            .with_field(
                FieldSpec::number("store_count")
                    .non_negative()
                    .describe("Store Count, Number of Stores"),
            )
            .with_field(
                FieldSpec::number("sales_per_square_foot")
                    .non_negative()
                    .describe("Sales per Square Foot"),
            )
            .with_field(
                FieldSpec::number("inventory_turnover")
                    .non_negative()
                    .describe("Inventory Turnover ratio"),
            )
    }

    /// Resolves an industry name to a preset; unknown names fall back to `general`.
    pub fn for_industry(industry: &str) -> Self {
        match industry.trim().to_lowercase().as_str() {
            "saas" | "software" => Self::saas(),
            "retail" | "ecommerce" => Self::retail(),
            _ => Self::general(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(json)?;
        schema.derivation_order()?;
        Ok(schema)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FieldSchema)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
