//! HTML pages served by `musterpoint serve`.

use std::borrow::Cow;

use quick_xml::escape::escape;

use musterpoint_core::ConflictList;
use musterpoint_core::PlanView;
use musterpoint_core::plan::form::{
    EVACUATION_LOCATION_FIELD, FAMILY_MEMBER_FIELD, NEIGHBORHOOD_MEETING_PLACE_FIELD,
    OUT_OF_TOWN_CONTACT_FIELD, REGIONAL_MEETING_PLACE_FIELD,
};

const STYLE: &str = "body{font-family:sans-serif;max-width:40em;margin:2em auto}\
label{display:block;margin-top:1em}input[type=text]{width:100%}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>{title}</title><style>{STYLE}</style></head>\
<body>{body}</body></html>",
        title = escape(title),
    )
}

fn text_input(label: &str, name: &str, value: &str) -> String {
    format!(
        "<label for=\"{name}\">{label}</label>\
<input type=\"text\" id=\"{name}\" name=\"{name}\" value=\"{value}\">",
        value = escape(value),
    )
}

/// The plan form: the four text fields and one input per member slot.
pub fn plan_page(view: &PlanView, logout_url: &str) -> String {
    let updated: Cow<'_, str> = match view.last_updated {
        Some(at) => format!("Last updated {}", at.format("%Y-%m-%d %H:%M UTC")).into(),
        None => "Not saved yet".into(),
    };

    let members = view
        .member_emails
        .iter()
        .enumerate()
        .map(|(i, email)| {
            format!(
                "<li><input type=\"text\" name=\"{FAMILY_MEMBER_FIELD}{i}\" value=\"{}\"></li>",
                escape(email.as_str())
            )
        })
        .collect::<Vec<_>>()
        .join("");

    let fields = &view.fields;
    let body = format!(
        "<p>Signed in as {email} | <a href=\"{logout}\">Sign out</a></p>\
<h1>{name}'s family emergency plan</h1>\
<p>{updated} | <a href=\"/fetchplan\">Download as XML</a></p>\
<form method=\"post\" action=\"/saveplan\">\
{contact}{neighborhood}{regional}{evacuation}\
<h2>Family members</h2><ol>{members}</ol>\
<button type=\"submit\">Save plan</button></form>",
        email = escape(view.user_email.as_str()),
        logout = escape(logout_url),
        name = escape(view.user_name.as_str()),
        contact = text_input(
            "Out-of-town contact",
            OUT_OF_TOWN_CONTACT_FIELD,
            &fields.out_of_town_contact
        ),
        neighborhood = text_input(
            "Neighborhood meeting place",
            NEIGHBORHOOD_MEETING_PLACE_FIELD,
            &fields.neighborhood_meeting_place
        ),
        regional = text_input(
            "Regional meeting place",
            REGIONAL_MEETING_PLACE_FIELD,
            &fields.regional_meeting_place
        ),
        evacuation = text_input(
            "Evacuation location",
            EVACUATION_LOCATION_FIELD,
            &fields.evacuation_location
        ),
    );
    page("Family emergency plan", &body)
}

/// Shown when a save is refused because members already have a plan.
pub fn conflict_page(conflicts: &ConflictList) -> String {
    let items = conflicts
        .into_iter()
        .map(|member| format!("<li>{}</li>", escape(member.email())))
        .collect::<Vec<_>>()
        .join("");
    let body = format!(
        "<h1>Plan not saved</h1>\
<p>These family members already belong to another plan:</p><ul>{items}</ul>\
<p>Ask them to remove themselves from that plan first, then try again.</p>\
<p><a href=\"/\">Back to your plan</a></p>"
    );
    page("Plan not saved", &body)
}
