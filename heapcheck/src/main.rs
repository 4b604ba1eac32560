use clap::{Parser as ClapParser, ValueEnum};

use heapcheck::Scenario;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Heap state to stage before running the checks
    #[arg(long, value_enum, default_value_t = Scenario::Healthy)]
    scenario: Scenario,

    /// Enable the region connectivity matrix
    #[arg(long)]
    matrix: bool,

    /// List the available scenarios and exit
    #[arg(long)]
    list: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list {
        for scenario in Scenario::value_variants() {
            let help = scenario
                .to_possible_value()
                .and_then(|value| value.get_help().map(ToString::to_string))
                .unwrap_or_default();
            println!("{:<24} {}", scenario.name(), help);
        }
        return;
    }

    log::info!(
        "running scenario {} (matrix {})",
        cli.scenario.name(),
        if cli.matrix { "on" } else { "off" }
    );
    cli.scenario.run(cli.matrix);
    println!("{}: all checks passed", cli.scenario.name());
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_flags_use_doc_comments() {
        let command = Cli::command();
        let help = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_help())
                .map(ToString::to_string)
        };

        assert_eq!(help("matrix").as_deref(), Some("Enable the region connectivity matrix"));
        assert_eq!(help("list").as_deref(), Some("List the available scenarios and exit"));
    }

    #[test]
    fn test_parses_scenario() {
        let cli = Cli::try_parse_from(["heapcheck", "--scenario", "humongous-gap", "--matrix"])
            .expect("valid arguments");
        assert_eq!(cli.scenario, Scenario::HumongousGap);
        assert!(cli.matrix);
        assert!(!cli.list);
    }
}
