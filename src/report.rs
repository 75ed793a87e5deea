//! Text report for one inspected queue entry.

use serde_json::Value;

use crate::message::{display_value, TaskBody, KEY_MISSING};

const HEAVY_RULE: &str = "=============================================";
const LIGHT_RULE: &str = "---------------------------------------------";

/// Renders the fixed-layout block printed for each queue entry.
///
/// Descriptor fields absent from `body` are rendered as [`KEY_MISSING`].
pub fn generate_info(
    queue_name: &str,
    correlation_id: &Value,
    body: &TaskBody,
    active_tasks: &str,
) -> String {
    let field = |value: Option<&Value>| {
        value
            .map(display_value)
            .unwrap_or_else(|| KEY_MISSING.to_string())
    };

    format!(
        "\n{HEAVY_RULE}\n\
         queue_name = {queue_name}\n\
         correlation_id = {correlation_id}\n\
         {LIGHT_RULE}\n\
         active_tasks = {active_tasks}\n\
         {LIGHT_RULE}\n\
         next_task = {next_task}\n\
         args = {args}\n\
         kwargs = {kwargs}\n\
         {HEAVY_RULE}\n",
        correlation_id = display_value(correlation_id),
        next_task = field(body.task()),
        args = field(body.args()),
        kwargs = field(body.kwargs()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_descriptor() {
        let body = TaskBody::from_value(json!({"task": "ship_order", "args": [42], "kwargs": {}}));
        let info = generate_info("orders", &json!("corr-1"), &body, "{}");

        let expected = "\n\
            =============================================\n\
            queue_name = orders\n\
            correlation_id = corr-1\n\
            ---------------------------------------------\n\
            active_tasks = {}\n\
            ---------------------------------------------\n\
            next_task = ship_order\n\
            args = [42]\n\
            kwargs = {}\n\
            =============================================\n";
        assert_eq!(info, expected);
    }

    #[test]
    fn test_missing_fields_render_sentinel() {
        let info = generate_info("orders", &json!(null), &TaskBody::empty(), "{}");
        assert!(info.contains("next_task = Key missing\n"));
        assert!(info.contains("args = Key missing\n"));
        assert!(info.contains("kwargs = Key missing\n"));
    }

    #[test]
    fn test_correlation_mapping_is_echoed() {
        let info = generate_info(
            "orders",
            &json!({"correlation_id": "abc"}),
            &TaskBody::empty(),
            "{}",
        );
        assert!(info.contains("correlation_id = {\"correlation_id\":\"abc\"}\n"));
    }
}
