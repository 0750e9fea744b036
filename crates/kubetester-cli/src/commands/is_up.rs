use super::{json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};

/// Exit 0 only when the environment is recorded as up and passes its health check.
pub fn run(ctx: &Context) -> Result<u8, String> {
    let session = ctx.open_read_only()?;
    let orch = &session.orchestrator;
    let name = &orch.config().name;

    let (up, reason) = match orch.is_up() {
        Ok(true) => (true, None),
        Ok(false) => (false, Some("not up".to_owned())),
        Err(e) => (false, Some(e.to_string())),
    };

    if ctx.json {
        let payload = serde_json::json!({
            "name": name,
            "up": up,
            "reason": reason,
        });
        println!("{}", json_pretty(&payload)?);
    } else if up {
        println!("{name} is up");
    } else if let Some(reason) = &reason {
        println!("{name} is down: {reason}");
    }

    Ok(if up { EXIT_SUCCESS } else { EXIT_FAILURE })
}
