use async_trait::async_trait;
use common::{email::EmailClient, error::Res, plan::{Plan, UsageKind}};
use db::models::user::User;
use mockall::automock;

/// Delivery of near-limit warnings.
#[automock]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn limit_warning(&self, user: &User, kind: UsageKind, percent: u32) -> Res<()>;
}

pub struct ResendNotifier {
    client: EmailClient,
}

impl ResendNotifier {
    pub fn new(client: EmailClient) -> Self {
        ResendNotifier { client }
    }
}

pub fn warning_subject(kind: UsageKind, percent: u32) -> String {
    format!("You have hit {}% of your {} limit", percent, kind.label())
}

fn warning_body(plan: Plan, kind: UsageKind, percent: u32) -> String {
    let consequence = match plan {
        Plan::Free => "when hitting 100%, this feature will be blocked until your usage resets or you upgrade your plan",
        Plan::Starter | Plan::Pro | Plan::Enterprise => {
            "when hitting 100%, any extra usage will incur additional fees"
        }
    };
    format!(
        "<h1>You are about to hit the limit!</h1>\
         <p>We have noticed you hit {}% of your {} limit for this month. \
         We are sending you this email to remind you that, {}.</p>\
         <p>Need assistance? Contact our \
         <a href=\"mailto:askjarvas@gmail.com\">support team.</a></p>",
        percent,
        kind.label(),
        consequence
    )
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn limit_warning(&self, user: &User, kind: UsageKind, percent: u32) -> Res<()> {
        self.client
            .send(
                &user.email,
                &warning_subject(kind, percent),
                &warning_body(user.plan, kind, percent),
            )
            .await
    }
}
