use crate::error::{MailError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    /// Mechanism and optional initial response
    Auth(String, Option<String>),
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(MailError::SmtpProtocol("Empty command".to_string()));
        }

        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.to_uppercase(), args.trim()),
            None => (line.to_uppercase(), ""),
        };

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(MailError::SmtpProtocol("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(MailError::SmtpProtocol("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "MAIL" => Ok(SmtpCommand::MailFrom(Self::parse_path(args, "FROM:")?)),
            "RCPT" => Ok(SmtpCommand::RcptTo(Self::parse_path(args, "TO:")?)),
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            "AUTH" => {
                let mut parts = args.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or_else(|| MailError::SmtpProtocol("AUTH requires mechanism".to_string()))?;
                let initial = parts.next().map(str::to_string);
                Ok(SmtpCommand::Auth(mechanism.to_uppercase(), initial))
            }
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// Extract the address from `FROM:<addr> [params]` or `TO:<addr> [params]`.
    /// ESMTP parameters are ignored.
    fn parse_path(args: &str, prefix: &str) -> Result<String> {
        let head = args.get(..prefix.len()).unwrap_or_default();
        if !head.eq_ignore_ascii_case(prefix) {
            return Err(MailError::SmtpProtocol(format!(
                "Invalid syntax, expected {}<address>",
                prefix
            )));
        }

        let rest = args[prefix.len()..].trim_start();
        let address = match rest.strip_prefix('<') {
            Some(inner) => inner
                .split_once('>')
                .map(|(addr, _)| addr)
                .ok_or_else(|| MailError::SmtpProtocol("Unterminated address".to_string()))?,
            None => rest.split_whitespace().next().unwrap_or_default(),
        };

        Ok(address.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helo() {
        let cmd = SmtpCommand::parse("HELO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
    }

    #[test]
    fn test_parse_ehlo_requires_domain() {
        assert!(SmtpCommand::parse("EHLO").is_err());
        let cmd = SmtpCommand::parse("ehlo client.local").unwrap();
        assert_eq!(cmd, SmtpCommand::Ehlo("client.local".to_string()));
    }

    #[test]
    fn test_parse_mail_from() {
        let cmd = SmtpCommand::parse("MAIL FROM:<sender@example.com>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_mail_from_with_params() {
        let cmd = SmtpCommand::parse("MAIL FROM: <sender@example.com> SIZE=1024 BODY=8BITMIME").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom("sender@example.com".to_string()));
    }

    #[test]
    fn test_parse_null_sender() {
        let cmd = SmtpCommand::parse("MAIL FROM:<>").unwrap();
        assert_eq!(cmd, SmtpCommand::MailFrom(String::new()));
    }

    #[test]
    fn test_parse_rcpt_to() {
        let cmd = SmtpCommand::parse("rcpt to:recipient@example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::RcptTo("recipient@example.com".to_string()));
    }

    #[test]
    fn test_parse_bad_path() {
        assert!(SmtpCommand::parse("MAIL sender@example.com").is_err());
        assert!(SmtpCommand::parse("RCPT TO:<open@example.com").is_err());
    }

    #[test]
    fn test_parse_auth() {
        assert_eq!(
            SmtpCommand::parse("AUTH plain AGRldgBzZWNyZXQ=").unwrap(),
            SmtpCommand::Auth("PLAIN".to_string(), Some("AGRldgBzZWNyZXQ=".to_string()))
        );
        assert_eq!(
            SmtpCommand::parse("AUTH LOGIN").unwrap(),
            SmtpCommand::Auth("LOGIN".to_string(), None)
        );
        assert!(SmtpCommand::parse("AUTH").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(SmtpCommand::parse("DATA").unwrap(), SmtpCommand::Data);
        assert_eq!(SmtpCommand::parse("rset").unwrap(), SmtpCommand::Rset);
        assert_eq!(SmtpCommand::parse("NOOP").unwrap(), SmtpCommand::Noop);
        assert_eq!(SmtpCommand::parse("QUIT").unwrap(), SmtpCommand::Quit);
        assert_eq!(
            SmtpCommand::parse("VRFY someone").unwrap(),
            SmtpCommand::Unknown("VRFY".to_string())
        );
    }
}
