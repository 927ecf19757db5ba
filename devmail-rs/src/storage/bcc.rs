use crate::model::EmailAddress;

/// Envelope recipients that do not appear in To or Cc.
///
/// Each envelope recipient consumes one matching Cc entry, else one matching
/// To entry. Recipients left unmatched are the blind copies, in envelope
/// order. Matching is exact.
pub fn calculate_bcc(
    recipients: &[String],
    to: &[EmailAddress],
    cc: &[EmailAddress],
) -> Vec<EmailAddress> {
    let mut remaining_to: Vec<&str> = to.iter().map(|a| a.address.as_str()).collect();
    let mut remaining_cc: Vec<&str> = cc.iter().map(|a| a.address.as_str()).collect();
    let mut bcc = Vec::new();

    for recipient in recipients {
        if let Some(pos) = remaining_cc.iter().position(|a| a == recipient) {
            remaining_cc.remove(pos);
        } else if let Some(pos) = remaining_to.iter().position(|a| a == recipient) {
            remaining_to.remove(pos);
        } else {
            bcc.push(EmailAddress::new(recipient.clone()));
        }
    }

    bcc
}
