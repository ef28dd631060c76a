//! Email boundary.
//!
//! The engine never renders or sends anything; it hands one activation
//! message per newly created structure to the mail collaborator.

use serde::Serialize;

use tremplin_model::StructureKind;

/// "Activate your account" message for a freshly created structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationEmail {
    pub to: String,
    pub structure_name: String,
    pub kind: StructureKind,
    pub siret: String,
}

pub trait Mailer {
    fn send_activation_emails(&mut self, emails: &[ActivationEmail]);
}

/// Mailer that drops everything. Used by dry runs.
#[derive(Debug, Default)]
pub struct NullMailer;

impl Mailer for NullMailer {
    fn send_activation_emails(&mut self, _emails: &[ActivationEmail]) {}
}
