//! Provider listing.

use crate::AppContext;

pub fn list(ctx: &AppContext) {
    let active = ctx.client.active_provider();
    println!("Model providers:\n");
    for capability in ctx.client.list_providers() {
        let marker = if capability.active { "*" } else { " " };
        let status = if capability.available {
            "configured"
        } else {
            "not configured"
        };
        let model = active
            .as_ref()
            .filter(|a| a.id() == capability.name)
            .map(|a| format!(" model {}", a.model()))
            .unwrap_or_default();
        println!("{} {} - {}{}", marker, capability.name, status, model);
    }
    if active.is_none() {
        println!("\n  Set GEMINI_API_KEY, GROQ_API_KEY or ANTHROPIC_API_KEY to enable a provider.");
    }
}
