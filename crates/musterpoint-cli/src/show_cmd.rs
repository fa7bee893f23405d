use std::fmt::Write;

use anyhow::{Context, Result};

use musterpoint_core::{MemberId, PlanService, PlanView};

/// Print the plan `email` belongs to, creating it if there is none.
pub async fn run_show(service: &PlanService, email: &str) -> Result<()> {
    let member = MemberId::parse(email).with_context(|| format!("invalid member: {email}"))?;
    let view = service.load_plan_view(&member).await?;
    print!("{}", render_plan(&view));
    Ok(())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

pub fn render_plan(view: &PlanView) -> String {
    let mut out = String::new();
    let fields = &view.fields;
    let _ = writeln!(out, "Plan:         {}", view.plan_id);
    let _ = writeln!(
        out,
        "Updated:      {}",
        view.last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    let _ = writeln!(out, "Contact:      {}", or_dash(&fields.out_of_town_contact));
    let _ = writeln!(out, "Neighborhood: {}", or_dash(&fields.neighborhood_meeting_place));
    let _ = writeln!(out, "Regional:     {}", or_dash(&fields.regional_meeting_place));
    let _ = writeln!(out, "Evacuation:   {}", or_dash(&fields.evacuation_location));
    let _ = writeln!(out, "Members:");
    for email in view.members() {
        let _ = writeln!(out, "  {email}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use musterpoint_core::store::MemoryPlanStore;

    use super::*;

    #[tokio::test]
    async fn render_lists_members_and_blank_fields() {
        let service = PlanService::new(Arc::new(MemoryPlanStore::new()));
        let ann = MemberId::parse("ann@x.org").unwrap();
        let view = service.load_plan_view(&ann).await.unwrap();

        let text = render_plan(&view);
        assert!(text.contains("Updated:      never"));
        assert!(text.contains("Contact:      -"));
        assert!(text.ends_with("Members:\n  ann@x.org\n"));
    }

    #[tokio::test]
    async fn show_rejects_malformed_email() {
        let service = PlanService::new(Arc::new(MemoryPlanStore::new()));
        let err = run_show(&service, "two words").await.unwrap_err();
        assert!(err.to_string().contains("invalid member"));
    }
}
