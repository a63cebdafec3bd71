//! OTP command handler

use crate::{CliError, CliResult, OtpArgs, OtpCommand, OtpTargetArgs};
use console::style;
use mobiprobe::{OtpClient, OtpTarget, ProbeConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Target named on the command line
pub fn otp_target(args: OtpTargetArgs) -> CliResult<OtpTarget> {
    match (args.phone, args.email) {
        (Some(number), None) => Ok(OtpTarget::PhoneNumber(number)),
        (None, Some(address)) => Ok(OtpTarget::EmailAddress(address)),
        _ => Err(CliError::invalid_argument(
            "pass exactly one of --phone or --email",
        )),
    }
}

fn cancel_on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

/// Execute an OTP subcommand. Values go to stdout, status to stderr.
pub async fn execute_otp(mut config: ProbeConfig, args: OtpArgs) -> CliResult<()> {
    if let Some(url) = args.api_url {
        config.otp.api_url = url;
    }
    let cancel = CancellationToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());
    let client = OtpClient::from_config(&config).with_cancel(cancel);

    let result = run(client, args.command).await;
    interrupt.abort();
    result
}

async fn run(mut client: OtpClient, command: OtpCommand) -> CliResult<()> {
    match command {
        OtpCommand::Phone { country_code, wait } => {
            let number = client.reserve_phone_number(&country_code).await?;
            reserved(&number, "--phone");
            if wait {
                wait_for_code(&mut client).await?;
            }
        }
        OtpCommand::Email { wait } => {
            let address = client.reserve_email_address().await?;
            reserved(&address, "--email");
            if wait {
                wait_for_code(&mut client).await?;
            }
        }
        OtpCommand::Code(target) => {
            let mut client = client.with_reservation(otp_target(target)?);
            println!("{}", client.otp_code().await?);
        }
        OtpCommand::Release(target) => {
            let target = otp_target(target)?;
            let mut client = client.with_reservation(target.clone());
            client.release().await;
            let released = client.reservation().is_some_and(|r| r.released);
            if !released {
                return Err(CliError::config(format!(
                    "{target} could not be released, check the OTP service URL"
                )));
            }
            eprintln!("{} Released {target}", style("✓").green().for_stderr());
        }
    }
    Ok(())
}

fn reserved(value: &str, flag: &str) {
    println!("{value}");
    eprintln!(
        "{} Reserved {} (release with: mobiprobe otp release {flag} {value})",
        style("✓").green().for_stderr(),
        style(value).bold().for_stderr()
    );
}

async fn wait_for_code(client: &mut OtpClient) -> CliResult<()> {
    match client.otp_code().await {
        Ok(code) => {
            println!("{code}");
            Ok(())
        }
        Err(err) => {
            client.release().await;
            Err(err.into())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_target() {
        let target = otp_target(OtpTargetArgs {
            phone: Some("+15550001111".to_string()),
            email: None,
        })
        .unwrap();
        assert_eq!(target, OtpTarget::PhoneNumber("+15550001111".to_string()));
    }

    #[test]
    fn test_email_target() {
        let target = otp_target(OtpTargetArgs {
            phone: None,
            email: Some("qa@example.com".to_string()),
        })
        .unwrap();
        assert_eq!(target, OtpTarget::EmailAddress("qa@example.com".to_string()));
    }

    #[test]
    fn test_missing_target_rejected() {
        let err = otp_target(OtpTargetArgs {
            phone: None,
            email: None,
        })
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_release_against_unreachable_service_fails() {
        let config = ProbeConfig::default().with_otp_url("http://127.0.0.1:9");
        let args = OtpArgs {
            api_url: None,
            command: OtpCommand::Release(OtpTargetArgs {
                phone: Some("+15550001111".to_string()),
                email: None,
            }),
        };
        let err = execute_otp(config, args).await.unwrap_err();
        assert!(err.to_string().contains("+15550001111"));
    }
}
