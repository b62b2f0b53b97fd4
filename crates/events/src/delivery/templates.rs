//! Email templates.
//!
//! Every template is a pure function of its inputs and returns a subject, an
//! HTML body and a plain-text alternative. User-supplied text is escaped
//! before it is placed in HTML.

use herald_core::categories::{
    CATEGORY_LOW_BALANCE, CATEGORY_VERIFICATION_COMPLETED, CATEGORY_VERIFICATION_STARTED,
};
use herald_core::policy::Frequency;
use herald_db::models::notification::Notification;

/// Prefix of every subject line.
const SUBJECT_PREFIX: &str = "[Herald]";

/// A fully rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Pick the template for a notification's category.
pub fn render_notification(greeting: &str, notification: &Notification) -> RenderedEmail {
    match notification.category.as_str() {
        CATEGORY_VERIFICATION_STARTED => verification_started(greeting, notification),
        CATEGORY_VERIFICATION_COMPLETED => verification_completed(greeting, notification),
        CATEGORY_LOW_BALANCE => low_balance(greeting, notification),
        _ => generic_notification(greeting, notification),
    }
}

pub fn generic_notification(greeting: &str, notification: &Notification) -> RenderedEmail {
    let mut text = format!("Hi {greeting},\n\n{}\n", notification.message);
    let mut inner = format!("<p>{}</p>", escape_html(&notification.message));
    if let Some(link) = &notification.link {
        text.push_str(&format!("\nOpen: {link}\n"));
        inner.push_str(&button(link, "Open"));
    }
    RenderedEmail {
        subject: subject(&notification.title),
        html: layout(greeting, &notification.title, &inner),
        text,
    }
}

pub fn verification_started(greeting: &str, notification: &Notification) -> RenderedEmail {
    let service = data_str(notification, "service").unwrap_or("your service");
    let number = data_str(notification, "phone_number");

    let mut text = format!(
        "Hi {greeting},\n\nA verification for {service} has started.\n"
    );
    let mut inner = format!(
        "<p>A verification for <strong>{}</strong> has started.</p>",
        escape_html(service)
    );
    if let Some(number) = number {
        text.push_str(&format!("Use this number: {number}\n"));
        inner.push_str(&format!(
            "<p>Use this number: <code>{}</code></p>",
            escape_html(number)
        ));
    }
    text.push_str("We'll let you know as soon as the code arrives.\n");
    inner.push_str("<p>We'll let you know as soon as the code arrives.</p>");

    RenderedEmail {
        subject: subject("Your verification has started"),
        html: layout(greeting, "Verification started", &inner),
        text,
    }
}

pub fn verification_completed(greeting: &str, notification: &Notification) -> RenderedEmail {
    let service = data_str(notification, "service").unwrap_or("your service");
    let code = data_str(notification, "code");

    let mut text = format!("Hi {greeting},\n\nYour verification for {service} is complete.\n");
    let mut inner = format!(
        "<p>Your verification for <strong>{}</strong> is complete.</p>",
        escape_html(service)
    );
    if let Some(code) = code {
        text.push_str(&format!("Code: {code}\n"));
        inner.push_str(&format!(
            "<p style=\"font-size:24px;letter-spacing:4px\"><strong>{}</strong></p>",
            escape_html(code)
        ));
    }

    RenderedEmail {
        subject: subject("Verification completed"),
        html: layout(greeting, "Verification completed", &inner),
        text,
    }
}

pub fn low_balance(greeting: &str, notification: &Notification) -> RenderedEmail {
    let balance = data_str(notification, "balance");
    let mut text = format!("Hi {greeting},\n\n{}\n", notification.message);
    let mut inner = format!("<p>{}</p>", escape_html(&notification.message));
    if let Some(balance) = balance {
        text.push_str(&format!("Current balance: {balance}\n"));
        inner.push_str(&format!(
            "<p>Current balance: <strong>{}</strong></p>",
            escape_html(balance)
        ));
    }
    let link = notification.link.as_deref().unwrap_or("/billing");
    text.push_str(&format!("Top up: {link}\n"));
    inner.push_str(&button(link, "Top up"));

    RenderedEmail {
        subject: subject("Your balance is running low"),
        html: layout(greeting, "Low balance", &inner),
        text,
    }
}

pub fn daily_digest(greeting: &str, notifications: &[Notification]) -> RenderedEmail {
    digest(greeting, "Your daily summary", "today", notifications)
}

pub fn weekly_digest(greeting: &str, notifications: &[Notification]) -> RenderedEmail {
    digest(greeting, "Your weekly summary", "this week", notifications)
}

/// The digest template for `frequency`; `None` for non-digest frequencies.
pub fn render_digest(
    frequency: Frequency,
    greeting: &str,
    notifications: &[Notification],
) -> Option<RenderedEmail> {
    match frequency {
        Frequency::Daily => Some(daily_digest(greeting, notifications)),
        Frequency::Weekly => Some(weekly_digest(greeting, notifications)),
        Frequency::Instant | Frequency::Never => None,
    }
}

fn digest(greeting: &str, title: &str, period: &str, notifications: &[Notification]) -> RenderedEmail {
    let count = notifications.len();
    let noun = if count == 1 { "notification" } else { "notifications" };

    let mut text = format!("Hi {greeting},\n\nYou have {count} {noun} from {period}:\n\n");
    let mut inner = format!("<p>You have {count} {noun} from {period}:</p><ul>");
    for n in notifications {
        text.push_str(&format!("- {}: {}\n", n.title, n.message));
        inner.push_str(&format!(
            "<li><strong>{}</strong><br>{}</li>",
            escape_html(&n.title),
            escape_html(&n.message)
        ));
    }
    inner.push_str("</ul>");

    RenderedEmail {
        subject: subject(&format!("{title} ({count} {noun})")),
        html: layout(greeting, title, &inner),
        text,
    }
}

/// A minimal email verifying the transport configuration.
pub fn test_email(greeting: &str) -> RenderedEmail {
    let inner = "<p>This is a test email. Email delivery is configured correctly.</p>";
    RenderedEmail {
        subject: subject("Test email"),
        html: layout(greeting, "Test email", inner),
        text: format!(
            "Hi {greeting},\n\nThis is a test email. Email delivery is configured correctly.\n"
        ),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn subject(text: &str) -> String {
    format!("{SUBJECT_PREFIX} {text}")
}

fn data_str<'a>(notification: &'a Notification, key: &str) -> Option<&'a str> {
    notification.data.get(key).and_then(|v| v.as_str())
}

fn button(href: &str, label: &str) -> String {
    format!(
        "<p><a href=\"{}\" style=\"display:inline-block;padding:10px 18px;\
         background:#2563eb;color:#fff;border-radius:6px;text-decoration:none\">{}</a></p>",
        escape_html(href),
        escape_html(label)
    )
}

fn layout(greeting: &str, heading: &str, inner: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:sans-serif;color:#111\">\
         <h2>{}</h2><p>Hi {},</p>{inner}\
         <hr><p style=\"color:#888;font-size:12px\">You can change which emails you receive \
         in your notification settings.</p></body></html>",
        escape_html(heading),
        escape_html(greeting),
    )
}

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::categories::CATEGORY_SMS_RECEIVED;
    use serde_json::json;

    use super::*;

    fn notification(category: &str, data: serde_json::Value) -> Notification {
        Notification {
            id: 1,
            user_id: 1,
            category: category.to_string(),
            title: "New SMS".to_string(),
            message: "Code <1234> received".to_string(),
            link: Some("/numbers/1".to_string()),
            icon: None,
            data,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generic_template_escapes_html() {
        let email = generic_notification("Ada", &notification(CATEGORY_SMS_RECEIVED, json!({})));
        assert_eq!(email.subject, "[Herald] New SMS");
        assert!(email.html.contains("Code &lt;1234&gt; received"));
        assert!(email.text.contains("Code <1234> received"));
        assert!(email.text.contains("/numbers/1"));
    }

    #[test]
    fn category_selects_template() {
        let n = notification(
            CATEGORY_VERIFICATION_COMPLETED,
            json!({"service": "Acme", "code": "998877"}),
        );
        let email = render_notification("Ada", &n);
        assert_eq!(email.subject, "[Herald] Verification completed");
        assert!(email.text.contains("Code: 998877"));

        let low = render_notification(
            "Ada",
            &notification(CATEGORY_LOW_BALANCE, json!({"balance": "$1.20"})),
        );
        assert!(low.html.contains("$1.20"));
    }

    #[test]
    fn verification_started_without_data_uses_fallbacks() {
        let email = verification_started("there", &notification(CATEGORY_VERIFICATION_STARTED, json!({})));
        assert!(email.text.contains("your service"));
        assert!(!email.text.contains("Use this number"));
    }

    #[test]
    fn digest_lists_every_notification() {
        let items = vec![
            notification(CATEGORY_SMS_RECEIVED, json!({})),
            notification(CATEGORY_SMS_RECEIVED, json!({})),
        ];
        let email = render_digest(Frequency::Weekly, "Ada", &items).unwrap();
        assert_eq!(email.subject, "[Herald] Your weekly summary (2 notifications)");
        assert_eq!(email.html.matches("<li>").count(), 2);
        assert!(render_digest(Frequency::Instant, "Ada", &items).is_none());
    }
}
