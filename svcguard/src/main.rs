use anyhow::{Context, bail};
use clap::Parser;
use svcguard::{
    Config,
    acl::PermissionMatrix,
    config::{Args, Command, TokenKind},
    telemetry,
    token::{Claims, SecretClass, parse_unverified_token},
};
use uuid::Uuid;

/// `5:10,20` grants codes 10 and 20 in service 5
fn parse_grant(grant: &str) -> anyhow::Result<(i32, Vec<i32>)> {
    let (service, codes) = grant
        .split_once(':')
        .with_context(|| format!("grant '{grant}' is not of the form SERVICE:CODE[,CODE...]"))?;
    let service = service.trim().parse().with_context(|| format!("invalid service code in '{grant}'"))?;
    let codes = codes
        .split(',')
        .map(|code| code.trim().parse().with_context(|| format!("invalid permission code in '{grant}'")))
        .collect::<anyhow::Result<Vec<i32>>>()?;
    Ok((service, codes))
}

fn issue(config: &Config, user_id: Uuid, session_id: Option<Uuid>, grants: &[String], roles: Vec<String>, kind: TokenKind) -> anyhow::Result<String> {
    let mut permissions = PermissionMatrix::new();
    for grant in grants {
        let (service, codes) = parse_grant(grant)?;
        permissions.grant(service, codes);
    }

    let mut claims = Claims::new(user_id, session_id.unwrap_or_else(Uuid::new_v4), permissions, roles);
    let engine = config.token_engine();
    let token = match kind {
        TokenKind::Access => engine.create_access_token(&mut claims),
        TokenKind::Refresh => engine.create_refresh_token(&mut claims),
        TokenKind::Private => engine.create_private_access_token(&mut claims),
    }?;
    Ok(token)
}

fn inspect(config: &Config, token: &str) -> anyhow::Result<String> {
    let class = SecretClass::of(&parse_unverified_token(token).context("token is not a readable JWT")?);
    let claims = config
        .token_engine()
        .parse_token(token, class)
        .with_context(|| format!("{class} token failed verification"))?;
    Ok(serde_json::to_string_pretty(&claims)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.json_logs)?;

    tracing::debug!("{:?}", args);

    match args.command {
        Some(Command::Issue {
            user_id,
            session_id,
            grants,
            role,
            kind,
        }) => println!("{}", issue(&config, user_id, session_id, &grants, role, kind)?),
        Some(Command::Inspect { token }) => println!("{}", inspect(&config, &token)?),
        None => bail!("nothing to do: pass --validate or one of the `issue` / `inspect` subcommands"),
    }
    Ok(())
}
