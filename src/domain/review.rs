use crate::domain::models::AnomalyStatus;

/// Reviewer moves on anomaly reports. Resolved and rejected are final.
pub fn anomaly_transition_allowed(from: AnomalyStatus, to: AnomalyStatus) -> bool {
    use AnomalyStatus::*;
    matches!(
        (from, to),
        (Open, InReview) | (Open, Resolved) | (Open, Rejected) | (InReview, Resolved) | (InReview, Rejected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnomalyStatus::*;

    #[test]
    fn open_reports_move_forward() {
        assert!(anomaly_transition_allowed(Open, InReview));
        assert!(anomaly_transition_allowed(Open, Rejected));
        assert!(anomaly_transition_allowed(InReview, Resolved));
    }

    #[test]
    fn closed_reports_are_final() {
        for to in [Open, InReview, Resolved, Rejected] {
            assert!(!anomaly_transition_allowed(Resolved, to));
            assert!(!anomaly_transition_allowed(Rejected, to));
        }
        assert!(!anomaly_transition_allowed(InReview, Open));
        assert!(!anomaly_transition_allowed(Open, Open));
    }
}
