extern crate clap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use once_cell::sync::OnceCell;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{json, Value};

use cronfleet::config::{ClientConfig, Config};
use cronfleet::http;
use cronfleet::job::{Active, FileRef, NotifyConfig, NotifyStatus, NotifyStrategy, NotifyType};
use cronfleet::master::api::USER_HEADER;

static CONFIG: OnceCell<ClientConfig> = OnceCell::new();

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Master {
    client: reqwest::Client,
    address: String,
    user_id: i64,
}

impl Master {
    fn from_matches(top: &ArgMatches, sub: &ArgMatches) -> anyhow::Result<Master> {
        let defaults = CONFIG.get().cloned().unwrap_or_default();
        let flag = |name: &str| sub.value_of(name).or_else(|| top.value_of(name)).map(str::to_string);
        let address = flag("master")
            .or(defaults.master_address)
            .ok_or_else(|| anyhow!("master address required, pass --master or set [client] master_address"))?;
        let user_id = match flag("user") {
            Some(user) => user.parse::<i64>().context("--user must be an integer")?,
            None => defaults
                .user_id
                .ok_or_else(|| anyhow!("user id required, pass --user or set [client] user_id"))?,
        };
        Ok(Master {
            client: http::client(REQUEST_TIMEOUT).context("building http client")?,
            address,
            user_id,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, http::url(&self.address, path))
            .header(USER_HEADER, self.user_id.to_string())
    }

    async fn upload(&self, script: &Path) -> anyhow::Result<FileRef> {
        let content = tokio::fs::read(script)
            .await
            .with_context(|| format!("reading {}", script.display()))?;
        let name = script
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", script.display()))?
            .to_string();
        let form = Form::new().part("file", Part::bytes(content).file_name(name));
        let response = self
            .request(reqwest::Method::POST, "/files/upload")
            .multipart(form)
            .send()
            .await?;
        http::parse_envelope::<FileRef>(response)
            .await?
            .ok_or_else(|| anyhow!("master returned no file reference"))
    }

    async fn send<B: Serialize>(&self, method: reqwest::Method, path: &str, body: Option<&B>) -> anyhow::Result<Value> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let data = http::parse_envelope::<Value>(request.send().await?).await?;
        Ok(data.unwrap_or(Value::Null))
    }
}

fn notify_config(matches: &ArgMatches) -> anyhow::Result<Option<NotifyConfig>> {
    let mark = match matches.value_of("notify") {
        Some(mark) => mark.to_string(),
        None => return Ok(None),
    };
    let strategy = match matches.value_of("strategy").unwrap_or("after_failed") {
        "after_success" => NotifyStrategy::AfterSuccess,
        "after_failed" => NotifyStrategy::AfterFailed,
        "always" => NotifyStrategy::Always,
        other => return Err(anyhow!("unknown notify strategy {:?}", other)),
    };
    Ok(Some(NotifyConfig {
        status: NotifyStatus::Enabled,
        notify_type: NotifyType::Email,
        strategy,
        mark,
    }))
}

fn active(matches: &ArgMatches) -> Option<Active> {
    if matches.is_present("stop") {
        Some(Active::Stop)
    } else if matches.is_present("start") {
        Some(Active::Start)
    } else {
        None
    }
}

fn job_id(matches: &ArgMatches) -> anyhow::Result<i64> {
    matches
        .value_of("id")
        .ok_or_else(|| anyhow!("job id required"))?
        .parse()
        .context("job id must be an integer")
}

/// Shared job flags; `create` requires name, time and script.
fn job_args<'a, 'b>(command: App<'a, 'b>, required: bool) -> App<'a, 'b> {
    command
        .arg(
            Arg::with_name("name")
                .short("n")
                .long("name")
                .value_name("NAME")
                .required(required)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("time")
                .short("t")
                .long("time")
                .value_name("CRON_SYNTAX")
                .help("Six-field cron expression, seconds first")
                .required(required)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("script")
                .short("s")
                .long("script")
                .value_name("FILE")
                .help("Script uploaded to the master before the job is saved")
                .required(required)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("notify")
                .long("notify")
                .value_name("EMAIL")
                .help("Send run notifications to this address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .possible_values(&["after_success", "after_failed", "always"])
                .requires("notify")
                .takes_value(true),
        )
        .arg(Arg::with_name("stop").long("stop").help("Save the job without scheduling it"))
        .arg(
            Arg::with_name("start")
                .long("start")
                .conflicts_with("stop")
                .help("Schedule the job"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cronfleet::init_tracing("warn");

    let matches = App::new("cronfleet-client")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Creates, updates and deletes cron jobs on a cronfleet master")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .global(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("master")
                .short("m")
                .long("master")
                .value_name("HOST:PORT")
                .global(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("user")
                .short("u")
                .long("user")
                .value_name("USER_ID")
                .global(true)
                .takes_value(true),
        )
        .subcommand(
            job_args(
                SubCommand::with_name("create").about("Uploads a script and schedules it on a node"),
                true,
            )
            .arg(
                Arg::with_name("node")
                    .short("d")
                    .long("node")
                    .value_name("NODE_ID")
                    .required(true)
                    .takes_value(true),
            ),
        )
        .subcommand(
            job_args(SubCommand::with_name("update").about("Changes an existing job"), false)
                .arg(Arg::with_name("id").required(true).index(1)),
        )
        .subcommand(
            SubCommand::with_name("delete")
                .about("Removes a job from its node and the master")
                .arg(Arg::with_name("id").required(true).index(1)),
        )
        .subcommand(SubCommand::with_name("list").about("Lists your jobs"))
        .get_matches();

    // A missing config file is fine as long as the flags cover it.
    let config_file = Config::resolve_path(matches.value_of("config"));
    if let Some(config) = Config::from_file_if_exists(&config_file)? {
        let _ = CONFIG.set(config.client.unwrap_or_default());
    }

    let result = match matches.subcommand() {
        ("create", Some(sub)) => {
            let master = Master::from_matches(&matches, sub)?;
            let script = sub.value_of("script").ok_or_else(|| anyhow!("--script is required"))?;
            let file = master.upload(Path::new(script)).await?;
            let node_id: i64 = sub
                .value_of("node")
                .ok_or_else(|| anyhow!("--node is required"))?
                .parse()
                .context("--node must be an integer")?;
            let body = json!({
                "name": sub.value_of("name"),
                "exec_type": "file",
                "cron_expr": sub.value_of("time"),
                "active": active(sub).unwrap_or(Active::Start),
                "node_id": node_id,
                "notify": notify_config(sub)?.unwrap_or_default(),
                "file": file,
            });
            master.send(reqwest::Method::POST, "/jobs", Some(&body)).await?
        }
        ("update", Some(sub)) => {
            let master = Master::from_matches(&matches, sub)?;
            let id = job_id(sub)?;
            let file = match sub.value_of("script") {
                Some(script) => Some(master.upload(Path::new(script)).await?),
                None => None,
            };
            let body = json!({
                "name": sub.value_of("name"),
                "cron_expr": sub.value_of("time"),
                "active": active(sub),
                "notify": notify_config(sub)?,
                "file": file,
            });
            master
                .send(reqwest::Method::PUT, &format!("/jobs/{}", id), Some(&body))
                .await?
        }
        ("delete", Some(sub)) => {
            let master = Master::from_matches(&matches, sub)?;
            let id = job_id(sub)?;
            master
                .send::<Value>(reqwest::Method::DELETE, &format!("/jobs/{}", id), None)
                .await?
        }
        ("list", Some(sub)) => {
            let master = Master::from_matches(&matches, sub)?;
            master.send::<Value>(reqwest::Method::GET, "/jobs", None).await?
        }
        (other, _) => return Err(anyhow!("unknown subcommand {:?}", other)),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
