use std::collections::BTreeSet;

use async_trait::async_trait;

use elevate_common::{Error, UserId};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MailFlag {
    /// Thread the message as a reply to the proposal notification.
    Reply,
}

/// The outbound notification sink.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(
        &self,
        to: &BTreeSet<UserId>,
        cc: &BTreeSet<UserId>,
        subject: &str,
        html_body: &str,
        flags: &BTreeSet<MailFlag>,
    ) -> Result<(), Error>;
}
