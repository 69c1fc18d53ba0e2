use clap::{Parser as ClapParser, Subcommand};
use macroql::cli::{self, CliError, ExpandOptions, InspectOptions};
use std::fs;
use std::io::{self, Read};

#[derive(ClapParser)]
#[command(name = "macroql")]
#[command(about = "Expand shorthand time-series SQL macros into fully-resolved SQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a macro-laden query into executable SQL
    Expand {
        /// The query to expand (reads from stdin if not provided)
        query: Option<String>,

        /// Path to a JSON file holding the query context
        #[arg(short, long)]
        context: Option<String>,

        /// Inline JSON query context (overrides --context)
        #[arg(long)]
        context_json: Option<String>,
    },

    /// Parse a query and print its clause tree as JSON
    Ast {
        /// The query to parse (reads from stdin if not provided)
        query: Option<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Expand {
            query,
            context,
            context_json,
        } => run_expand(query, context, context_json),
        Commands::Ast { query, pretty } => run_ast(query, pretty),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn read_query(query: Option<String>) -> Result<String, CliError> {
    match query {
        Some(q) => Ok(q),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(CliError::Io)?;
            Ok(buffer)
        }
        None => Err(CliError::NoInput),
    }
}

fn run_expand(
    query: Option<String>,
    context: Option<String>,
    context_json: Option<String>,
) -> Result<(), CliError> {
    let query = read_query(query)?;
    let context_json = match (context_json, context) {
        (Some(inline), _) => Some(inline),
        (None, Some(path)) => Some(fs::read_to_string(path).map_err(CliError::Io)?),
        (None, None) => None,
    };

    let options = ExpandOptions {
        query,
        context_json,
    };
    println!("{}", cli::execute_expand(&options)?);
    Ok(())
}

fn run_ast(query: Option<String>, pretty: bool) -> Result<(), CliError> {
    let query = read_query(query)?;
    let options = InspectOptions { query, pretty };
    println!("{}", cli::execute_inspect(&options)?);
    Ok(())
}
