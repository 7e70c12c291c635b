use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("kairos {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: kairos");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("KAIROS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: webtransport={}, cli=true",
        cfg!(feature = "webtransport")
    );
    println!(
        "session: reconnect_delay={:?}, keepalive_interval={:?}",
        kairos_session::DEFAULT_RECONNECT_DELAY,
        kairos_session::DEFAULT_KEEPALIVE_INTERVAL
    );

    Ok(SUCCESS)
}
