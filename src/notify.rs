use uuid::Uuid;

/// Events the core reports to the outside world.
#[derive(Debug, Clone)]
pub enum Notification {
    EnrollmentApproved {
        learner: Uuid,
        course: Uuid,
    },
    EnrollmentRejected {
        learner: Uuid,
        course: Uuid,
        reason: String,
    },
    CourseCompleted {
        learner: Uuid,
        course: Uuid,
    },
    CertificateReady {
        holder_name: String,
        verification_code: String,
    },
}

/// Fire-and-forget delivery seam.
///
/// Implementations must not fail in a way that reaches the caller: a lost
/// notification never rolls back the state transition that produced it.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Default dispatcher: structured log lines, picked up by whatever ships
/// logs off the host.
pub struct TracingDispatcher;

impl NotificationDispatcher for TracingDispatcher {
    fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::EnrollmentApproved { learner, course } => {
                tracing::info!(%learner, %course, "enrollment approved");
            }
            Notification::EnrollmentRejected {
                learner,
                course,
                reason,
            } => {
                tracing::info!(%learner, %course, %reason, "enrollment rejected");
            }
            Notification::CourseCompleted { learner, course } => {
                tracing::info!(%learner, %course, "course completed");
            }
            Notification::CertificateReady {
                holder_name,
                verification_code,
            } => {
                tracing::info!(%holder_name, %verification_code, "certificate ready");
            }
        }
    }
}
