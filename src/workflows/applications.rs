use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::{Actor, SideEffect, Transition, WorkflowError};
use crate::audit::AuditSink;
use crate::config::GuildkeeperConfig;
use crate::discord::embeds::{branded, truncate};
use crate::discord::types::*;
use crate::discord::{PlatformError, PlatformOps};
use crate::gateway::custom_id::{CustomId, REVIEW_REASON_FIELD};
use crate::storage::{
    Answer, Application, ApplicationStatus, ApplicationType, NewApplication, NewLogEntry, ReviewCommit,
    ReviewDecision, Store,
};

/// Longest review reason and rendered answer, in characters.
pub const MAX_REASON_CHARS: usize = 1000;
const MAX_ANSWER_CHARS: usize = 1000;
/// Embeds hold at most 25 fields; one is reserved for the decision.
const MAX_ANSWER_FIELDS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewAction {
    Accept,
    Deny,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Deny => "deny",
        }
    }

    pub fn status(self) -> ApplicationStatus {
        match self {
            Self::Accept => ApplicationStatus::Accepted,
            Self::Deny => ApplicationStatus::Denied,
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "deny" => Ok(Self::Deny),
            _ => Err(()),
        }
    }
}

/// Inbound application as handed over by the submission front end.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationSubmission {
    #[serde(alias = "discord_user_id")]
    pub submitter_id: UserId,
    #[serde(alias = "discord_username")]
    pub submitter_name: String,
    #[serde(alias = "application_type", alias = "type")]
    pub kind: String,
    pub answers: Vec<Answer>,
}

/// A reviewer's submitted reason form.
#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub application_id: i64,
    pub action: ReviewAction,
    pub reason: String,
    pub reviewer: Actor,
    pub guild: GuildId,
    /// The posted notice whose controls should be retired.
    pub notice: Option<(ChannelId, MessageId)>,
}

pub struct ApplicationReview {
    store: Arc<dyn Store>,
    platform: Arc<dyn PlatformOps>,
    audit: Arc<AuditSink>,
    config: Arc<GuildkeeperConfig>,
}

impl ApplicationReview {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn PlatformOps>,
        audit: Arc<AuditSink>,
        config: Arc<GuildkeeperConfig>,
    ) -> Self {
        Self {
            store,
            platform,
            audit,
            config,
        }
    }

    /// Persists a new pending application and announces it to reviewers.
    pub async fn submit(&self, submission: ApplicationSubmission) -> Result<Transition<Application>, WorkflowError> {
        let kind: ApplicationType = submission.kind.parse().map_err(|_| {
            WorkflowError::Validation("Invalid application type. Expected staff, gsp or fbi.".to_string())
        })?;
        if submission.submitter_name.trim().is_empty() {
            return Err(WorkflowError::Validation("Missing required fields.".to_string()));
        }

        let application = self
            .store
            .insert_application(&NewApplication {
                submitter_id: submission.submitter_id,
                submitter_name: submission.submitter_name.trim().to_string(),
                kind,
                answers: submission.answers,
            })
            .await?;
        info!(
            application_id = application.id,
            kind = %application.kind,
            submitter = %application.submitter_id,
            "Application submitted"
        );

        let mut transition = Transition::new(application.clone());
        let submitted = NewLogEntry::new(
            "application_submitted",
            format!("Application ID: {}, Type: {}", application.id, application.kind),
        )
        .by(application.submitter_id, application.submitter_name.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(submitted))
            .await;

        match self.config.channels.applications {
            Some(channel) => {
                let posted = transition
                    .attempt(
                        SideEffect::PublicNotice,
                        self.platform
                            .send_message(channel, &self.submission_notice(&application)),
                    )
                    .await;
                if let Some(message) = posted {
                    let entry = NewLogEntry::new(
                        "application_posted_discord",
                        format!("Application ID: {}, Message ID: {message}", application.id),
                    );
                    transition
                        .attempt(SideEffect::AuditEntry, self.audit.record(entry))
                        .await;
                }
            }
            None => transition.skip(SideEffect::PublicNotice, "applications channel not configured"),
        }

        Ok(transition)
    }

    pub async fn list_applications(&self) -> Result<Vec<Application>, WorkflowError> {
        Ok(self.store.list_applications().await?)
    }

    pub async fn get_application(&self, id: i64) -> Result<Application, WorkflowError> {
        self.store
            .get_application(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Application #{id} not found.")))
    }

    pub fn authorize_reviewer(&self, reviewer: &Actor) -> Result<(), WorkflowError> {
        match self.config.roles.reviewer {
            Some(role) if !reviewer.has_role(role) && !reviewer.is_administrator() => Err(
                WorkflowError::PermissionDenied("You do not have permission to review applications.".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Produces the reason form for a reviewer. Nothing changes until the form comes back.
    pub async fn request_review(
        &self,
        reviewer: &Actor,
        application_id: i64,
        action: ReviewAction,
    ) -> Result<Modal, WorkflowError> {
        self.authorize_reviewer(reviewer)?;
        let application = self.get_application(application_id).await?;
        if application.status != ApplicationStatus::Pending {
            return Err(WorkflowError::AlreadyFinalized {
                id: application.id,
                status: application.status,
            });
        }
        Ok(review_form(application_id, action))
    }

    /// Commits the decision, then grants roles, notifies and logs on a best-effort basis.
    pub async fn finalize_review(&self, review: ReviewSubmission) -> Result<Transition<Application>, WorkflowError> {
        self.authorize_reviewer(&review.reviewer)?;

        let reason = review.reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::Validation("A reason is required.".to_string()));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(WorkflowError::Validation(format!(
                "Reasons are limited to {MAX_REASON_CHARS} characters."
            )));
        }

        let decision = ReviewDecision {
            status: review.action.status(),
            reviewer: review.reviewer.id,
            reason: reason.to_string(),
            reviewed_at: Utc::now(),
        };
        let application = match self
            .store
            .finalize_application(review.application_id, &decision)
            .await?
        {
            ReviewCommit::Committed(application) => application,
            ReviewCommit::AlreadyFinalized(application) => {
                return Err(WorkflowError::AlreadyFinalized {
                    id: application.id,
                    status: application.status,
                })
            }
            ReviewCommit::Missing => {
                return Err(WorkflowError::NotFound(format!(
                    "Application #{} not found.",
                    review.application_id
                )))
            }
        };
        info!(
            application_id = application.id,
            status = %application.status,
            reviewer = %review.reviewer.id,
            "Application finalized"
        );

        let mut transition = Transition::new(application.clone());
        if review.action == ReviewAction::Accept {
            self.grant_role(&mut transition, &application, review.guild).await;
        }

        match self.config.channels.application_results {
            Some(channel) => {
                let notice = MessagePayload::embeds(branded(
                    &self.config.branding,
                    self.result_embed(&application, &review.reviewer),
                ));
                transition
                    .attempt(SideEffect::PublicNotice, self.platform.send_message(channel, &notice))
                    .await;
            }
            None => transition.skip(SideEffect::PublicNotice, "results channel not configured"),
        }

        let dm = MessagePayload::embeds(branded(&self.config.branding, self.applicant_embed(&application)));
        transition
            .attempt(
                SideEffect::DirectNotification,
                self.platform.send_direct_message(application.submitter_id, &dm),
            )
            .await;

        let entry = NewLogEntry::new(
            format!("application_{}", application.status),
            format!(
                "Application ID: {}, Applicant: {}",
                application.id, application.submitter_name
            ),
        )
        .by(review.reviewer.id, review.reviewer.username.clone());
        transition
            .attempt(SideEffect::AuditEntry, self.audit.record(entry))
            .await;

        match self.config.channels.logs {
            Some(channel) => {
                let embed = Embed::new()
                    .title("📝 Application Reviewed")
                    .field("Application ID", format!("#{}", application.id), true)
                    .field("Action", application.status.as_str().to_uppercase(), true)
                    .field("Type", application.kind.display_name(), true)
                    .field("Reviewer", review.reviewer.id.mention(), true)
                    .field("Applicant", application.submitter_id.mention(), true);
                transition
                    .attempt(SideEffect::LogNotice, self.audit.notify(channel, embed))
                    .await;
            }
            None => transition.skip(SideEffect::LogNotice, "log channel not configured"),
        }

        match review.notice {
            Some((channel, message)) => {
                let edited = self.decided_notice(&application);
                transition
                    .attempt(
                        SideEffect::NoticeEdit,
                        self.platform.edit_message(channel, message, &edited),
                    )
                    .await;
            }
            None => transition.skip(SideEffect::NoticeEdit, "no notice to update"),
        }

        Ok(transition)
    }

    async fn grant_role(&self, transition: &mut Transition<Application>, application: &Application, guild: GuildId) {
        let Some(role) = self.role_for(application.kind) else {
            transition.skip(SideEffect::RoleGrant, "no role configured for this application type");
            return;
        };
        match self.platform.fetch_member(guild, application.submitter_id).await {
            Ok(_) => {
                let reason = format!("Application #{} accepted", application.id);
                transition
                    .attempt(
                        SideEffect::RoleGrant,
                        self.platform
                            .add_role(guild, application.submitter_id, role, Some(&reason)),
                    )
                    .await;
            }
            Err(PlatformError::NotFound { .. }) => {
                transition.skip(SideEffect::RoleGrant, "applicant is not a member of the server");
            }
            Err(error) => {
                transition
                    .attempt(SideEffect::RoleGrant, async { Err::<(), _>(error) })
                    .await;
            }
        }
    }

    fn role_for(&self, kind: ApplicationType) -> Option<RoleId> {
        let roles = &self.config.roles;
        match kind {
            ApplicationType::Staff => roles.staff_application,
            ApplicationType::Gsp => roles.gsp_application,
            ApplicationType::Fbi => roles.fbi_application,
        }
    }

    fn answers_embed(&self, application: &Application) -> Embed {
        let mut embed = Embed::new()
            .title(format!("📋 New {} Application", application.kind.display_name()))
            .description(format!(
                "**Applicant:** {} ({})\n**Application ID:** #{}",
                application.submitter_id.mention(),
                application.submitter_name,
                application.id
            ))
            .color(self.config.branding.color)
            .timestamp(application.created_at);

        for answer in application.answers.iter().take(MAX_ANSWER_FIELDS) {
            let value = if answer.answer.trim().is_empty() {
                "No answer provided".to_string()
            } else {
                truncate(&answer.answer, MAX_ANSWER_CHARS)
            };
            embed = embed.field(truncate(&answer.question, 256), value, false);
        }
        embed
    }

    /// Notice posted for reviewers, carrying the accept and deny controls.
    pub fn submission_notice(&self, application: &Application) -> MessagePayload {
        let controls = ActionRow::new(vec![
            Component::button(
                ButtonStyle::Success,
                "Accept",
                CustomId::ReviewButton {
                    action: ReviewAction::Accept,
                    application: application.id,
                }
                .to_string(),
            ),
            Component::button(
                ButtonStyle::Danger,
                "Deny",
                CustomId::ReviewButton {
                    action: ReviewAction::Deny,
                    application: application.id,
                }
                .to_string(),
            ),
        ]);
        let mut payload = MessagePayload::embeds(branded(&self.config.branding, self.answers_embed(application)))
            .with_components(vec![controls]);
        if let Some(role) = self.config.roles.application_ping {
            payload = payload.with_content(role.mention());
        }
        payload
    }

    /// The submission notice after a decision: decision field added, controls removed.
    pub fn decided_notice(&self, application: &Application) -> MessagePayload {
        let branding = &self.config.branding;
        let color = match application.status {
            ApplicationStatus::Accepted => branding.success_color,
            _ => branding.danger_color,
        };
        let reviewer = application
            .reviewer_id
            .map(UserId::mention)
            .unwrap_or_else(|| "unknown".to_string());
        let embed = self
            .answers_embed(application)
            .color(color)
            .field(
                "Decision",
                format!(
                    "**{}** by {reviewer}\n**Reason:** {}",
                    application.status.as_str().to_uppercase(),
                    application.review_reason.as_deref().unwrap_or("")
                ),
                false,
            );
        MessagePayload::embeds(branded(branding, embed)).clear_components()
    }

    fn result_embed(&self, application: &Application, reviewer: &Actor) -> Embed {
        let branding = &self.config.branding;
        let (title, color) = match application.status {
            ApplicationStatus::Accepted => ("✅ Application Accepted", branding.success_color),
            _ => ("❌ Application Denied", branding.danger_color),
        };
        Embed::new()
            .title(title)
            .color(color)
            .field("Applicant", application.submitter_id.mention(), true)
            .field("Type", application.kind.display_name(), true)
            .field("Reviewed By", reviewer.id.mention(), true)
            .field("Reason", application.review_reason.clone().unwrap_or_default(), false)
    }

    fn applicant_embed(&self, application: &Application) -> Embed {
        let accepted = application.status == ApplicationStatus::Accepted;
        let branding = &self.config.branding;
        let mut embed = Embed::new()
            .title(if accepted {
                "🎉 Application Accepted"
            } else {
                "Application Update"
            })
            .color(if accepted {
                branding.success_color
            } else {
                branding.danger_color
            })
            .description(format!(
                "Your **{}** application has been **{}**.",
                application.kind.display_name(),
                application.status
            ))
            .field("Reason", application.review_reason.clone().unwrap_or_default(), false);
        if accepted {
            embed = embed.field(
                "Next Steps",
                "A member of the team will contact you shortly with further instructions.",
                false,
            );
        }
        embed
    }
}

/// Reason form bound to one application and one decision.
pub fn review_form(application_id: i64, action: ReviewAction) -> Modal {
    let title = match action {
        ReviewAction::Accept => "Accept Application",
        ReviewAction::Deny => "Deny Application",
    };
    Modal {
        custom_id: CustomId::ReviewForm {
            action,
            application: application_id,
        }
        .to_string(),
        title: title.to_string(),
        components: vec![ActionRow::new(vec![Component::text_input(
            REVIEW_REASON_FIELD,
            "Reason",
            TextInputStyle::Paragraph,
            (1, MAX_REASON_CHARS as u16),
            Some("Explain the decision"),
        )])],
    }
}
