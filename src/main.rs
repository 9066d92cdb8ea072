use std::fs::File;
use std::io;
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use tracing::{debug, error, info, warn};

use eurostat_acquisition::eurostat::{
    self, get_data, get_dic, get_par_values, get_pars, get_toc, subset_toc, CatalogEntry, Client, DataRequest,
    Dictionary, DictionaryForm, Filters, Language, Provider,
};
use eurostat_acquisition::{ProxySettings, RequestConfig, SeriesSpec, WideSeries};

const DEFAULT_CONFIG: &str = "config/eurostat.toml";

fn command_usage<'a, 'b>() -> App<'a, 'b> {
    let code = Arg::with_name("code")
        .required(true)
        .help("Dataset code, e.g. nama_10_gdp");
    let lang = Arg::with_name("lang")
        .long("lang")
        .takes_value(true)
        .default_value("en")
        .possible_values(&["en", "fr", "de"])
        .help("Language of labels");
    let filter = Arg::with_name("filter")
        .short("f")
        .long("filter")
        .takes_value(true)
        .multiple(true)
        .number_of_values(1)
        .help("Dimension filter as dim=value[,value...]; may be repeated");

    App::new("eurostat-acquisition")
        .author("Matthew Scheffel <matt@dataheck.com>")
        .about("Fetches datasets, codelists and the table of contents from the Eurostat SDMX API")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .help("Location of request configuration [default: config/eurostat.toml]; ignored when the file does not exist"),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .global(true)
                .help("HTTP timeout in seconds"),
        )
        .arg(
            Arg::with_name("proxy")
                .long("proxy")
                .takes_value(true)
                .global(true)
                .help("Proxy as http://host:port"),
        )
        .arg(
            Arg::with_name("proxy-user")
                .long("proxy-user")
                .takes_value(true)
                .global(true)
                .help("Proxy username"),
        )
        .arg(
            Arg::with_name("proxy-password")
                .long("proxy-password")
                .takes_value(true)
                .global(true)
                .help("Proxy password"),
        )
        .arg(
            Arg::with_name("insecure")
                .long("insecure")
                .global(true)
                .help("Do not verify TLS certificates"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .global(true)
                .help("Write to this file instead of stdout"),
        )
        .arg(
            Arg::with_name("delimiter")
                .long("delimiter")
                .takes_value(true)
                .global(true)
                .help("Output field delimiter [default: ,]; use '\\t' for tab"),
        )
        .subcommand(
            SubCommand::with_name("data")
                .about("Download a dataset")
                .arg(code.clone())
                .arg(filter.clone())
                .arg(Arg::with_name("flags").long("flags").help("Keep observation flags"))
                .arg(Arg::with_name("start").long("start").takes_value(true).help("First period, e.g. 2015"))
                .arg(Arg::with_name("end").long("end").takes_value(true).help("Last period"))
                .arg(
                    Arg::with_name("reverse-time")
                        .long("reverse-time")
                        .help("Reverse the order of period columns"),
                )
                .arg(Arg::with_name("verbose").long("verbose").help("Report download progress")),
        )
        .subcommand(
            SubCommand::with_name("pars")
                .about("List the dimensions of a dataset")
                .arg(code.clone()),
        )
        .subcommand(
            SubCommand::with_name("par-values")
                .about("List the values a dimension takes in a dataset")
                .arg(code.clone())
                .arg(Arg::with_name("par").required(true).help("Dimension id")),
        )
        .subcommand(
            SubCommand::with_name("dic")
                .about("Labels for a dimension's codes, or for the dimensions themselves")
                .arg(code.clone())
                .arg(Arg::with_name("par").help("Dimension id"))
                .arg(
                    Arg::with_name("format")
                        .long("format")
                        .takes_value(true)
                        .default_value("list")
                        .possible_values(&["list", "dict", "table"])
                        .help("dict prints JSON"),
                )
                .arg(
                    Arg::with_name("used-only")
                        .long("used-only")
                        .help("Only codes that occur in the dataset"),
                )
                .arg(lang.clone()),
        )
        .subcommand(
            SubCommand::with_name("toc")
                .about("Table of contents")
                .arg(
                    Arg::with_name("agency")
                        .long("agency")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1)
                        .help("EUROSTAT, COMEXT, COMP, EMPL or GROW; may be repeated. Default: all"),
                )
                .arg(Arg::with_name("dataset").long("dataset").takes_value(true).help("Only this dataset"))
                .arg(
                    Arg::with_name("keyword")
                        .long("keyword")
                        .takes_value(true)
                        .help("Keep titles containing this keyword"),
                )
                .arg(lang),
        )
        .subcommand(
            SubCommand::with_name("series")
                .about("Dataset as a date-indexed table with one column per geography")
                .arg(code)
                .arg(
                    Arg::with_name("geo")
                        .long("geo")
                        .takes_value(true)
                        .required(true)
                        .use_delimiter(true)
                        .help("Geographies to keep, comma separated"),
                )
                .arg(filter.help("Keep rows where dim=value; may be repeated"))
                .arg(
                    Arg::with_name("rename")
                        .long("rename")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1)
                        .help("Column rename as from=to, e.g. EU27_2020=EU"),
                )
                .arg(
                    Arg::with_name("per")
                        .long("per")
                        .takes_value(true)
                        .help("Divide by this dataset (same geographies), e.g. demo_pjan"),
                )
                .arg(
                    Arg::with_name("per-filter")
                        .long("per-filter")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1)
                        .requires("per")
                        .help("Row filter for the --per dataset as dim=value"),
                )
                .arg(
                    Arg::with_name("scale")
                        .long("scale")
                        .takes_value(true)
                        .default_value("1")
                        .help("Multiplier applied before dividing by --per"),
                )
                .arg(
                    Arg::with_name("yoy-periods")
                        .long("yoy-periods")
                        .takes_value(true)
                        .default_value("12")
                        .help("Periods back for the year-over-year change in the summary log"),
                ),
        )
}

/// A global option, whether given before or after the subcommand.
fn setting<'m>(matches: &'m ArgMatches, name: &str) -> Option<&'m str> {
    matches
        .subcommand()
        .1
        .and_then(|sub| sub.value_of(name))
        .or_else(|| matches.value_of(name))
}

fn switch(matches: &ArgMatches, name: &str) -> bool {
    matches.is_present(name) || matches.subcommand().1.map_or(false, |sub| sub.is_present(name))
}

fn request_config(matches: &ArgMatches) -> anyhow::Result<RequestConfig> {
    let path = Path::new(setting(matches, "config").unwrap_or(DEFAULT_CONFIG));
    let mut config = if path.is_file() {
        RequestConfig::from_file(path)?
    } else {
        debug!(path = %path.display(), "no configuration file, using defaults");
        RequestConfig::default()
    };

    if let Some(secs) = setting(matches, "timeout") {
        let secs = secs
            .parse::<u64>()
            .with_context(|| format!("Invalid timeout specified: '{}'", secs))?;
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(url) = setting(matches, "proxy") {
        let proxy = ProxySettings {
            url: url.to_owned(),
            username: setting(matches, "proxy-user").map(String::from),
            password: setting(matches, "proxy-password").map(String::from),
        };
        config.proxy = Some(proxy.to_url()?);
    }
    if switch(matches, "insecure") {
        config.verify_tls = false;
    }

    Ok(config)
}

fn output_writer(matches: &ArgMatches) -> anyhow::Result<csv::Writer<Box<dyn io::Write>>> {
    let delimiter = match setting(matches, "delimiter").unwrap_or(",") {
        "\\t" | "\t" => b'\t',
        d if d.len() == 1 => d.as_bytes()[0],
        d => bail!("Delimiter must be a single character, got '{}'", d),
    };

    let sink: Box<dyn io::Write> = match setting(matches, "output") {
        Some(path) => Box::new(File::create(path).with_context(|| format!("Failed to create {}", path))?),
        None => Box::new(io::stdout()),
    };

    Ok(csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(sink))
}

fn write_records<I, R>(matches: &ArgMatches, records: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = output_writer(matches)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_filters(values: Option<clap::Values>) -> anyhow::Result<Vec<(String, Vec<String>)>> {
    values
        .into_iter()
        .flatten()
        .map(|raw| match raw.split_once('=') {
            Some((key, values)) if !key.is_empty() => Ok((
                key.trim().to_owned(),
                values.split(',').map(|v| v.trim().to_owned()).collect(),
            )),
            _ => Err(anyhow!("Filter must look like dim=value[,value...], got '{}'", raw)),
        })
        .collect()
}

fn parse_pairs(values: Option<clap::Values>) -> anyhow::Result<Vec<(String, String)>> {
    parse_filters(values)?
        .into_iter()
        .map(|(key, mut values)| match values.len() {
            1 => Ok((key, values.remove(0))),
            _ => Err(anyhow!("Expected a single value for '{}'", key)),
        })
        .collect()
}

fn language(matches: &ArgMatches) -> anyhow::Result<Language> {
    matches
        .value_of("lang")
        .unwrap_or("en")
        .parse::<Language>()
        .map_err(|e| anyhow!(e))
}

fn load_series(client: &Client, code: &str, spec: &SeriesSpec) -> anyhow::Result<WideSeries> {
    let table = get_data(client, code, &DataRequest::default())?
        .ok_or_else(|| anyhow!("No data returned for {}", code))?;
    Ok(WideSeries::load(&table, spec)?)
}

fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let config = request_config(&matches)?;
    let client = Client::new(config)?;

    match matches.subcommand() {
        ("data", Some(sub)) => {
            let code = sub.value_of("code").unwrap_or_default();
            let mut filters = Filters::new();
            for (key, values) in parse_filters(sub.values_of("filter"))? {
                filters.insert(&key, values);
            }
            if let Some(start) = sub.value_of("start") {
                filters.start_period = Some(start.to_owned());
            }
            if let Some(end) = sub.value_of("end") {
                filters.end_period = Some(end.to_owned());
            }

            let request = DataRequest {
                flags: sub.is_present("flags"),
                filters,
                verbose: sub.is_present("verbose"),
                reverse_time: sub.is_present("reverse-time"),
            };
            match get_data(&client, code, &request)? {
                Some(table) => {
                    info!(code, rows = table.rows.len(), "downloaded dataset");
                    write_records(&matches, table.records())?;
                }
                None => warn!(code, "no data"),
            }
        }
        ("pars", Some(sub)) => {
            let code = sub.value_of("code").unwrap_or_default();
            let pars = get_pars(&client, code)?;
            write_records(&matches, pars.into_iter().map(|p| vec![p]))?;
        }
        ("par-values", Some(sub)) => {
            let code = sub.value_of("code").unwrap_or_default();
            let par = sub.value_of("par").unwrap_or_default();
            let values = get_par_values(&client, code, par)?;
            write_records(&matches, values.into_iter().map(|v| vec![v]))?;
        }
        ("dic", Some(sub)) => {
            let code = sub.value_of("code").unwrap_or_default();
            let form = sub
                .value_of("format")
                .unwrap_or("list")
                .parse::<DictionaryForm>()
                .map_err(|e| anyhow!(e))?;
            let dictionary = get_dic(
                &client,
                code,
                sub.value_of("par"),
                form,
                !sub.is_present("used-only"),
                language(sub)?,
            )?;

            match &dictionary {
                Dictionary::Map(_) => {
                    let json = serde_json::to_string_pretty(&dictionary)?;
                    match setting(&matches, "output") {
                        Some(path) => std::fs::write(path, json).with_context(|| format!("Failed to write {}", path))?,
                        None => println!("{}", json),
                    }
                }
                _ => {
                    let table = dictionary.to_table();
                    let header = if table.columns.is_empty() { None } else { Some(table.columns) };
                    write_records(&matches, header.into_iter().chain(table.rows))?;
                }
            }
        }
        ("toc", Some(sub)) => {
            let providers = sub
                .values_of("agency")
                .into_iter()
                .flatten()
                .map(|a| a.parse::<Provider>().map_err(|e| anyhow!(e)))
                .collect::<anyhow::Result<Vec<Provider>>>()?;
            let mut entries = get_toc(&client, &providers, sub.value_of("dataset"), language(sub)?)?;
            if let Some(keyword) = sub.value_of("keyword") {
                entries = subset_toc(&entries, keyword);
            }
            info!(entries = entries.len(), "table of contents");

            let header: Vec<String> = CatalogEntry::HEADER.iter().map(|h| h.to_string()).collect();
            write_records(&matches, std::iter::once(header).chain(entries.iter().map(CatalogEntry::to_record)))?;
        }
        ("series", Some(sub)) => {
            let code = sub.value_of("code").unwrap_or_default();
            let geos: Vec<String> = sub.values_of("geo").into_iter().flatten().map(String::from).collect();
            let rename = parse_pairs(sub.values_of("rename"))?;
            let spec = SeriesSpec {
                geos: geos.clone(),
                filters: parse_pairs(sub.values_of("filter"))?,
                rename: rename.clone(),
            };
            let mut series = load_series(&client, code, &spec)?;

            if let Some(per) = sub.value_of("per") {
                let scale = sub
                    .value_of("scale")
                    .unwrap_or("1")
                    .parse::<f64>()
                    .context("Invalid scale")?;
                let denominator = load_series(
                    &client,
                    per,
                    &SeriesSpec {
                        geos,
                        filters: parse_pairs(sub.values_of("per-filter"))?,
                        rename,
                    },
                )?;
                series = WideSeries::ratio(&series, &denominator, scale);
            }

            let periods = sub
                .value_of("yoy-periods")
                .unwrap_or("12")
                .parse::<usize>()
                .context("Invalid yoy-periods")?;
            for column in &series.columns {
                info!(
                    column = %column,
                    latest = ?series.latest(column),
                    yoy = ?series.year_over_year(column, periods),
                    "series summary"
                );
            }

            write_records(&matches, series.records())?;
        }
        _ => bail!("Unknown command"),
    }

    Ok(())
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let matches = command_usage().get_matches();
    debug!(base = Provider::Eurostat.base_url(), agent = eurostat::USER_AGENT, "starting");

    if let Err(e) = run(matches) {
        error!("{:#}", e);
        process::exit(1);
    }
}
