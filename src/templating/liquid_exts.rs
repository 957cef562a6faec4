use liquid_core::Result;
use liquid_core::Runtime;
use liquid_core::{Display_filter, Filter, FilterReflection, ParseFilter};
use liquid_core::{Value, ValueView};
use serde_json::to_string_pretty;

#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "json",
    description = "Render the provided object into pretty-printed JSON.",
    parsed(JsonFilter)
)]
pub struct JsonFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "json"]
struct JsonFilter;

impl Filter for JsonFilter {
    fn evaluate(&self, input: &dyn ValueView, _runtime: &dyn Runtime) -> Result<Value> {
        let s = to_string_pretty(&input.to_value()).unwrap_or_else(|_e| "".to_string());
        Ok(Value::scalar(s))
    }
}

/// Header color for a node's map-reduce step type.
pub fn step_type_color(step_type: &str) -> &'static str {
    match step_type.to_lowercase().as_str() {
        "mapper" => "#3299BB",
        "reducer" => "#FF9900",
        "tez" => "#F5D04C",
        _ => "#BF0A0D",
    }
}

#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "step_color",
    description = "Map a step type (mapper, reducer, tez) to its header color.",
    parsed(StepColorFilter)
)]
pub struct StepColorFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "step_color"]
struct StepColorFilter;

impl Filter for StepColorFilter {
    fn evaluate(&self, input: &dyn ValueView, _runtime: &dyn Runtime) -> Result<Value> {
        let s = input.to_kstr();
        Ok(Value::scalar(step_type_color(&s).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_colors() {
        assert_eq!(step_type_color("Mapper"), "#3299BB");
        assert_eq!(step_type_color("reducer"), "#FF9900");
        assert_eq!(step_type_color(""), "#BF0A0D");
    }

    #[test]
    fn json_filter_pretty_prints() {
        let parser = liquid::ParserBuilder::with_stdlib()
            .filter(JsonFilterParser)
            .build()
            .unwrap();
        let template = parser.parse("{{ value | json }}").unwrap();
        let globals = liquid::object!({ "value": { "alias": "raw" } });
        assert_eq!(
            template.render(&globals).unwrap(),
            "{\n  \"alias\": \"raw\"\n}"
        );
    }
}
