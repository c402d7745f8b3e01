use anyhow::Result;
use console::style;
use docsight::action;
use serde_json::json;

pub fn execute(as_json: bool) -> Result<()> {
    if as_json {
        let actions: Vec<_> = action::all()
            .map(|definition| {
                json!({
                    "id": definition.id,
                    "label": definition.id.label(),
                    "output": definition.output,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    for definition in action::all() {
        println!(
            "{:<14} {}",
            style(definition.id).bold().green(),
            definition.id.label()
        );
    }
    Ok(())
}
