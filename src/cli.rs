//! Command line interface
//!
//! One subcommand group per service and one subcommand per snippet, plus the
//! scenario scripts. Handlers print a human-readable summary of the response.

use crate::config::Config;
use crate::gcp::client::GcpClient;
use crate::gcp::operation::{OperationKind, OperationStatus, PollConfig};
use crate::gcp::projects;
use crate::scenario::{self, StateFile};
use crate::snippets::{
    compute, deployments, healthcare, iam, monitoring, pubsub, storage, vision, Created,
};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;

/// Standalone Google Cloud API snippets
#[derive(Parser, Debug)]
#[command(name = "gcpsnip", version, about, long_about = None)]
pub struct Args {
    /// GCP project to use
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    /// Compute zone to use
    #[arg(short, long, global = true)]
    pub zone: Option<String>,

    /// Region for regional APIs (Healthcare)
    #[arg(short, long, global = true)]
    pub location: Option<String>,

    /// Send every API call to this base URL (emulators, mock servers)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Use this access token instead of Application Default Credentials
    #[arg(long, global = true, env = "GCPSNIP_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List accessible projects
    Projects,
    /// Show or change saved settings
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Compute Engine: instances, firewall rules, SSH keys
    #[command(subcommand)]
    Compute(ComputeCommand),
    /// Cloud Storage: buckets and objects
    #[command(subcommand)]
    Storage(StorageCommand),
    /// Pub/Sub: topics, subscriptions, messages
    #[command(subcommand)]
    Pubsub(PubsubCommand),
    /// Cloud Vision: image analysis
    #[command(subcommand)]
    Vision(VisionCommand),
    /// Cloud Monitoring: metrics and alert policies
    #[command(subcommand)]
    Monitoring(MonitoringCommand),
    /// IAM: service accounts and policy bindings
    #[command(subcommand)]
    Iam(IamCommand),
    /// Cloud Healthcare: DICOM datasets and stores
    #[command(subcommand)]
    Healthcare(HealthcareCommand),
    /// Deployment Manager: infrastructure stacks
    #[command(subcommand)]
    Deployments(DeploymentsCommand),
    /// End-to-end scenario scripts
    #[command(subcommand)]
    Scenario(ScenarioCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    SetProject { project_id: String },
    SetZone { zone_name: String },
    SetLocation { region: String },
}

/// Wait for the returned operation to finish
#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct WaitFlag {
    #[arg(long)]
    pub wait: bool,
}

#[derive(Subcommand, Debug)]
pub enum ComputeCommand {
    /// List instances in the zone
    List,
    Describe { name: String },
    /// Create an instance
    Create {
        name: String,
        #[arg(long, default_value = "e2-micro")]
        machine_type: String,
        #[arg(long, default_value = "debian-cloud")]
        image_project: String,
        #[arg(long, default_value = "debian-12")]
        image_family: String,
        /// Network tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// File whose contents become the startup script
        #[arg(long)]
        startup_script: Option<PathBuf>,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Start {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Stop {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Reset {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Delete {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    /// Poll an instance until it reaches a status
    WaitStatus {
        name: String,
        #[arg(long, default_value = "RUNNING")]
        status: String,
    },
    /// Create an ingress firewall rule for tagged instances
    FirewallCreate {
        name: String,
        #[arg(long)]
        target_tag: String,
        #[arg(long = "port", default_value = "22")]
        ports: Vec<String>,
        #[arg(long = "source-range", default_value = "0.0.0.0/0")]
        source_ranges: Vec<String>,
    },
    FirewallDelete { name: String },
    /// Add a public key to project-wide SSH keys
    AddSshKey {
        #[arg(long)]
        user: String,
        #[arg(long)]
        key_file: PathBuf,
    },
    /// Remove all project-wide SSH keys of a user
    RemoveSshKey {
        #[arg(long)]
        user: String,
    },
    /// Newest image of an image family
    Image {
        #[arg(long, default_value = "debian-cloud")]
        image_project: String,
        #[arg(long, default_value = "debian-12")]
        family: String,
    },
    MachineTypes,
    /// Show the status of a zonal (or --global / --regional) operation
    Operation {
        name: String,
        #[arg(long, conflicts_with = "regional")]
        global: bool,
        /// Operation in the region of the current zone
        #[arg(long)]
        regional: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    ListBuckets,
    CreateBucket {
        name: String,
        #[arg(long, default_value = "US")]
        bucket_location: String,
        #[arg(long, default_value = "STANDARD")]
        storage_class: String,
    },
    DeleteBucket {
        name: String,
        /// Delete all objects first
        #[arg(long)]
        force: bool,
    },
    ListObjects {
        bucket: String,
        #[arg(long)]
        prefix: Option<String>,
    },
    Upload {
        bucket: String,
        file: PathBuf,
        /// Object name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },
    Download {
        bucket: String,
        object: String,
        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Copy {
        source_bucket: String,
        source_object: String,
        dest_bucket: String,
        dest_object: String,
    },
    DeleteObject { bucket: String, object: String },
}

#[derive(Subcommand, Debug)]
pub enum PubsubCommand {
    CreateTopic { topic: String },
    ListTopics,
    DeleteTopic { topic: String },
    Publish {
        topic: String,
        message: String,
        /// Message attribute as key=value (repeatable)
        #[arg(long = "attr")]
        attributes: Vec<String>,
    },
    CreateSubscription {
        topic: String,
        subscription: String,
        #[arg(long, default_value_t = 10)]
        ack_deadline: u32,
    },
    Pull {
        subscription: String,
        #[arg(long, default_value_t = 10)]
        max: u32,
        /// Acknowledge what was pulled
        #[arg(long)]
        ack: bool,
    },
    DeleteSubscription { subscription: String },
}

#[derive(Subcommand, Debug)]
pub enum VisionCommand {
    /// Image is a gs:// or http(s) URI, or a local file
    Labels { image: String },
    Faces { image: String },
    Text { image: String },
    SafeSearch { image: String },
}

#[derive(Subcommand, Debug)]
pub enum MonitoringCommand {
    Descriptors {
        #[arg(long)]
        filter: Option<String>,
    },
    TimeSeries {
        metric_type: String,
        /// Window ending now, in minutes
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(i64).range(1..))]
        minutes: i64,
    },
    /// Write one point of a custom.googleapis.com/ gauge
    Write { metric_type: String, value: f64 },
    AlertPolicies,
    EnableAlert { policy_id: String },
    DisableAlert { policy_id: String },
}

#[derive(Subcommand, Debug)]
pub enum IamCommand {
    CreateServiceAccount {
        account_id: String,
        #[arg(long, default_value = "Created by gcpsnip")]
        display_name: String,
    },
    ListServiceAccounts,
    DeleteServiceAccount { email: String },
    CreateKey {
        email: String,
        /// Write the decoded key file here
        #[arg(long, short)]
        output: PathBuf,
    },
    ListKeys { email: String },
    Policy,
    AddBinding { role: String, member: String },
    RemoveBinding { role: String, member: String },
}

#[derive(Subcommand, Debug)]
pub enum HealthcareCommand {
    CreateDataset {
        dataset: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    ListDatasets,
    DeleteDataset { dataset: String },
    CreateStore { dataset: String, store: String },
    DescribeStore { dataset: String, store: String },
    DeleteStore { dataset: String, store: String },
    /// Import DICOM files from gs://bucket/path/**.dcm
    Import {
        dataset: String,
        store: String,
        source_uri: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Export {
        dataset: String,
        store: String,
        destination_uri: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
    /// Show an operation by full resource name
    Operation { name: String },
    Studies { dataset: String, store: String },
    Series {
        dataset: String,
        store: String,
        study_uid: String,
    },
    DeleteStudy {
        dataset: String,
        store: String,
        study_uid: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeploymentsCommand {
    Create {
        name: String,
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Describe { name: String },
    List,
    Resources { name: String },
    Delete {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScenarioCommand {
    /// SSH key, firewall rule and VM
    #[command(subcommand)]
    Compute(ComputeScenarioCommand),
    /// DICOM dataset, store, import and search
    #[command(subcommand)]
    Imaging(ImagingScenarioCommand),
    /// Deployment Manager stack
    #[command(subcommand)]
    Deployment(DeploymentScenarioCommand),
}

#[derive(Subcommand, Debug)]
pub enum ComputeScenarioCommand {
    Run {
        #[arg(long)]
        instance_name: Option<String>,
        #[arg(long, default_value = "e2-micro")]
        machine_type: String,
        /// Add this public key for --ssh-user
        #[arg(long, requires = "ssh_user")]
        ssh_key_file: Option<PathBuf>,
        #[arg(long, requires = "ssh_key_file")]
        ssh_user: Option<String>,
        /// Stop and start the instance once it is running
        #[arg(long)]
        stop_start: bool,
    },
    Cleanup,
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ImagingScenarioCommand {
    Run {
        /// DICOM files to import, gs://bucket/path/**.dcm
        #[arg(long)]
        source_uri: String,
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        delete_first_study: bool,
    },
    Cleanup,
    Status,
}

#[derive(Subcommand, Debug)]
pub enum DeploymentScenarioCommand {
    Run {
        name: String,
        #[arg(long)]
        config: PathBuf,
    },
    Cleanup,
    Status,
}

/// Settings-only commands
pub fn run_config(command: &ConfigCommand, config: &mut Config) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("project:  {}", config.effective_project());
            println!("zone:     {}", config.effective_zone());
            println!("location: {}", config.effective_location());
            println!(
                "polling:  every {}s, up to {} attempts",
                config.poll.interval_secs, config.poll.max_attempts
            );
        },
        ConfigCommand::SetProject { project_id } => {
            config.set_project(project_id)?;
            println!("Default project set to {}", project_id);
        },
        ConfigCommand::SetZone { zone_name } => {
            config.set_zone(zone_name)?;
            println!("Default zone set to {}", zone_name);
        },
        ConfigCommand::SetLocation { region } => {
            config.set_location(region)?;
            println!("Default location set to {}", region);
        },
    }
    Ok(())
}

/// Run a command that talks to GCP
pub async fn run(command: &Command, client: &GcpClient, poll: PollConfig) -> Result<()> {
    match command {
        Command::Config(_) => Err(anyhow::anyhow!("config commands do not use a client")),
        Command::Projects => {
            for project in projects::list_projects(client).await? {
                println!("{}", project);
            }
            Ok(())
        },
        Command::Compute(cmd) => run_compute(cmd, client, poll).await,
        Command::Storage(cmd) => run_storage(cmd, client).await,
        Command::Pubsub(cmd) => run_pubsub(cmd, client).await,
        Command::Vision(cmd) => run_vision(cmd, client).await,
        Command::Monitoring(cmd) => run_monitoring(cmd, client).await,
        Command::Iam(cmd) => run_iam(cmd, client).await,
        Command::Healthcare(cmd) => run_healthcare(cmd, client, poll).await,
        Command::Deployments(cmd) => run_deployments(cmd, client, poll).await,
        Command::Scenario(cmd) => run_scenario(cmd, client, poll).await,
    }
}

/// Print an operation name, or wait for a zonal operation when asked
async fn finish_zone_op(
    client: &GcpClient,
    op: serde_json::Value,
    wait: WaitFlag,
    poll: PollConfig,
) -> Result<()> {
    if wait.wait {
        compute::wait_zone_operation(client, &op, poll).await?;
        println!("Done");
    } else {
        println!("Started operation {}", compute::operation_name(&op)?);
    }
    Ok(())
}

async fn run_compute(cmd: &ComputeCommand, client: &GcpClient, poll: PollConfig) -> Result<()> {
    match cmd {
        ComputeCommand::List => {
            let instances = compute::list_instances(client).await?;
            if instances.is_empty() {
                println!("No instances in {}", client.zone);
            }
            for instance in instances {
                println!("{}", instance);
            }
        },
        ComputeCommand::Describe { name } => {
            println!("{}", compute::describe_instance(client, name).await?);
        },
        ComputeCommand::Create {
            name,
            machine_type,
            image_project,
            image_family,
            tags,
            startup_script,
            wait,
        } => {
            let mut request = compute::InstanceRequest::new(name).with_tags(tags.clone());
            request.machine_type = machine_type.clone();
            request.image_project = image_project.clone();
            request.image_family = image_family.clone();
            if let Some(path) = startup_script {
                let script = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                request = request.with_startup_script(&script);
            }
            let op = compute::create_instance(client, &request).await?;
            finish_zone_op(client, op, *wait, poll).await?;
        },
        ComputeCommand::Start { name, wait } => {
            let op = compute::start_instance(client, name).await?;
            finish_zone_op(client, op, *wait, poll).await?;
        },
        ComputeCommand::Stop { name, wait } => {
            let op = compute::stop_instance(client, name).await?;
            finish_zone_op(client, op, *wait, poll).await?;
        },
        ComputeCommand::Reset { name, wait } => {
            let op = compute::reset_instance(client, name).await?;
            finish_zone_op(client, op, *wait, poll).await?;
        },
        ComputeCommand::Delete { name, wait } => {
            let op = compute::delete_instance(client, name).await?;
            finish_zone_op(client, op, *wait, poll).await?;
        },
        ComputeCommand::WaitStatus { name, status } => {
            let instance = compute::wait_for_instance_status(client, name, status, poll).await?;
            println!("{}", instance);
        },
        ComputeCommand::FirewallCreate {
            name,
            target_tag,
            ports,
            source_ranges,
        } => {
            let mut request = compute::FirewallRequest::ssh(name, target_tag);
            request.description = format!("Allow tcp:{}", ports.join(","));
            request.tcp_ports = ports.clone();
            request.source_ranges = source_ranges.clone();
            match compute::create_firewall_rule(client, &request).await? {
                Created::New(op) => {
                    compute::wait_global_operation(client, &op, poll).await?;
                    println!("Created firewall rule {}", name);
                },
                Created::AlreadyExists => println!("Firewall rule {} already exists", name),
            }
        },
        ComputeCommand::FirewallDelete { name } => {
            let op = compute::delete_firewall_rule(client, name).await?;
            compute::wait_global_operation(client, &op, poll).await?;
            println!("Deleted firewall rule {}", name);
        },
        ComputeCommand::AddSshKey { user, key_file } => {
            let key = std::fs::read_to_string(key_file)
                .with_context(|| format!("Failed to read {}", key_file.display()))?;
            match compute::add_project_ssh_key(client, user, &key).await? {
                Some(op) => {
                    compute::wait_global_operation(client, &op, poll).await?;
                    println!("Added SSH key for {}", user);
                },
                None => println!("Key already present for {}", user),
            }
        },
        ComputeCommand::RemoveSshKey { user } => {
            match compute::remove_project_ssh_key(client, user).await? {
                Some(op) => {
                    compute::wait_global_operation(client, &op, poll).await?;
                    println!("Removed SSH keys for {}", user);
                },
                None => println!("No SSH keys for {}", user),
            }
        },
        ComputeCommand::Image {
            image_project,
            family,
        } => {
            println!(
                "{}",
                compute::get_image_from_family(client, image_project, family).await?
            );
        },
        ComputeCommand::MachineTypes => {
            for (name, description) in compute::list_machine_types(client).await? {
                println!("{:<24} {}", name, description);
            }
        },
        ComputeCommand::Operation {
            name,
            global,
            regional,
        } => {
            let url = if *global {
                compute::global_operation_url(client, name)
            } else if *regional {
                compute::region_operation_url(client, name)
            } else {
                compute::zone_operation_url(client, name)
            };
            match client.poll_operation(&url, OperationKind::Compute).await? {
                OperationStatus::Running => println!("{} RUNNING", name),
                OperationStatus::Done => println!("{} DONE", name),
                OperationStatus::Failed(message) => println!("{} FAILED: {}", name, message),
                OperationStatus::Unknown(status) => println!("{} {}", name, status),
            }
        },
    }
    Ok(())
}

async fn run_storage(cmd: &StorageCommand, client: &GcpClient) -> Result<()> {
    match cmd {
        StorageCommand::ListBuckets => {
            for bucket in storage::list_buckets(client).await? {
                println!("{}", bucket);
            }
        },
        StorageCommand::CreateBucket {
            name,
            bucket_location,
            storage_class,
        } => match storage::create_bucket(client, name, bucket_location, storage_class).await? {
            Created::New(bucket) => println!("Created {}", bucket),
            Created::AlreadyExists => {
                println!("Bucket name {} is already taken (bucket names are global)", name)
            },
        },
        StorageCommand::DeleteBucket { name, force } => {
            if *force {
                let count = storage::empty_bucket(client, name).await?;
                println!("Deleted {} object(s)", count);
            }
            storage::delete_bucket(client, name).await?;
            println!("Deleted bucket {}", name);
        },
        StorageCommand::ListObjects { bucket, prefix } => {
            for object in storage::list_objects(client, bucket, prefix.as_deref()).await? {
                println!("{}", object);
            }
        },
        StorageCommand::Upload {
            bucket,
            file,
            name,
            content_type,
        } => {
            let object_name = match name {
                Some(n) => n.clone(),
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("Cannot derive an object name from the file path")?
                    .to_string(),
            };
            let bytes =
                std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
            let object =
                storage::upload_object(client, bucket, &object_name, bytes, content_type).await?;
            println!("Uploaded gs://{}/{} ({} bytes)", bucket, object.name, object.size);
        },
        StorageCommand::Download {
            bucket,
            object,
            output,
        } => {
            let bytes = storage::download_object(client, bucket, object).await?;
            match output {
                Some(path) => {
                    std::fs::write(path, &bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} bytes to {}", bytes.len(), path.display());
                },
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                },
            }
        },
        StorageCommand::Copy {
            source_bucket,
            source_object,
            dest_bucket,
            dest_object,
        } => {
            let object =
                storage::copy_object(client, source_bucket, source_object, dest_bucket, dest_object)
                    .await?;
            println!("Copied to gs://{}/{}", dest_bucket, object.name);
        },
        StorageCommand::DeleteObject { bucket, object } => {
            storage::delete_object(client, bucket, object).await?;
            println!("Deleted gs://{}/{}", bucket, object);
        },
    }
    Ok(())
}

async fn run_pubsub(cmd: &PubsubCommand, client: &GcpClient) -> Result<()> {
    match cmd {
        PubsubCommand::CreateTopic { topic } => match pubsub::create_topic(client, topic).await? {
            Created::New(_) => println!("Created topic {}", topic),
            Created::AlreadyExists => println!("Topic {} already exists", topic),
        },
        PubsubCommand::ListTopics => {
            for topic in pubsub::list_topics(client).await? {
                println!("{}", topic);
            }
        },
        PubsubCommand::DeleteTopic { topic } => {
            pubsub::delete_topic(client, topic).await?;
            println!("Deleted topic {}", topic);
        },
        PubsubCommand::Publish {
            topic,
            message,
            attributes,
        } => {
            let attributes = pubsub::parse_attributes(attributes)?;
            let ids = pubsub::publish(client, topic, message.as_bytes(), &attributes).await?;
            println!("Published message id(s): {}", ids.join(", "));
        },
        PubsubCommand::CreateSubscription {
            topic,
            subscription,
            ack_deadline,
        } => match pubsub::create_subscription(client, topic, subscription, *ack_deadline).await? {
            Created::New(_) => println!("Created subscription {}", subscription),
            Created::AlreadyExists => println!("Subscription {} already exists", subscription),
        },
        PubsubCommand::Pull {
            subscription,
            max,
            ack,
        } => {
            let messages = pubsub::pull(client, subscription, *max).await?;
            if messages.is_empty() {
                println!("No messages");
            }
            for message in &messages {
                println!("{} {}: {}", message.publish_time, message.message_id, message.text());
            }
            if *ack {
                let ack_ids: Vec<String> = messages.iter().map(|m| m.ack_id.clone()).collect();
                pubsub::acknowledge(client, subscription, &ack_ids).await?;
                println!("Acknowledged {} message(s)", ack_ids.len());
            }
        },
        PubsubCommand::DeleteSubscription { subscription } => {
            pubsub::delete_subscription(client, subscription).await?;
            println!("Deleted subscription {}", subscription);
        },
    }
    Ok(())
}

async fn run_vision(cmd: &VisionCommand, client: &GcpClient) -> Result<()> {
    match cmd {
        VisionCommand::Labels { image } => {
            let source = vision::image_source_from_arg(image)?;
            for label in vision::detect_labels(client, &source).await? {
                println!("{}", label);
            }
        },
        VisionCommand::Faces { image } => {
            let source = vision::image_source_from_arg(image)?;
            let faces = vision::detect_faces(client, &source).await?;
            println!("Found {} face(s)", faces.len());
            for face in faces {
                println!("  {}", face);
            }
        },
        VisionCommand::Text { image } => {
            let source = vision::image_source_from_arg(image)?;
            let text = vision::detect_text(client, &source).await?;
            if text.is_empty() {
                println!("No text found");
            } else {
                println!("{}", text);
            }
        },
        VisionCommand::SafeSearch { image } => {
            let source = vision::image_source_from_arg(image)?;
            for (category, likelihood) in vision::detect_safe_search(client, &source).await? {
                println!("{:<10} {}", category, likelihood);
            }
        },
    }
    Ok(())
}

async fn run_monitoring(cmd: &MonitoringCommand, client: &GcpClient) -> Result<()> {
    match cmd {
        MonitoringCommand::Descriptors { filter } => {
            for descriptor in monitoring::list_metric_descriptors(client, filter.as_deref()).await? {
                println!("{}", descriptor);
            }
        },
        MonitoringCommand::TimeSeries {
            metric_type,
            minutes,
        } => {
            let series = monitoring::list_time_series(client, metric_type, *minutes).await?;
            if series.is_empty() {
                println!("No data in the last {} minutes", minutes);
            }
            for ts in series {
                println!("{} on {}", ts.metric_type, ts.resource_type);
                for point in ts.points {
                    println!("  {}  {}", point.end_time, point.value);
                }
            }
        },
        MonitoringCommand::Write { metric_type, value } => {
            monitoring::write_custom_metric(client, metric_type, *value).await?;
            println!("Wrote {} = {}", metric_type, value);
        },
        MonitoringCommand::AlertPolicies => {
            for policy in monitoring::list_alert_policies(client).await? {
                println!("{}", policy);
            }
        },
        MonitoringCommand::EnableAlert { policy_id } => {
            println!("{}", monitoring::set_alert_policy_enabled(client, policy_id, true).await?);
        },
        MonitoringCommand::DisableAlert { policy_id } => {
            println!("{}", monitoring::set_alert_policy_enabled(client, policy_id, false).await?);
        },
    }
    Ok(())
}

async fn run_iam(cmd: &IamCommand, client: &GcpClient) -> Result<()> {
    match cmd {
        IamCommand::CreateServiceAccount {
            account_id,
            display_name,
        } => match iam::create_service_account(client, account_id, display_name).await? {
            Created::New(account) => println!("Created {}", account.email),
            Created::AlreadyExists => println!(
                "{} already exists",
                iam::service_account_email(&client.project_id, account_id)
            ),
        },
        IamCommand::ListServiceAccounts => {
            for account in iam::list_service_accounts(client).await? {
                println!("{}", account);
            }
        },
        IamCommand::DeleteServiceAccount { email } => {
            iam::delete_service_account(client, email).await?;
            println!("Deleted {}", email);
        },
        IamCommand::CreateKey { email, output } => {
            use base64::Engine;
            let (key_id, private_key) = iam::create_service_account_key(client, email).await?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(private_key)
                .context("Key data is not valid base64")?;
            std::fs::write(output, decoded)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Created key {} -> {}", key_id, output.display());
        },
        IamCommand::ListKeys { email } => {
            for key in iam::list_service_account_keys(client, email).await? {
                println!("{}", key);
            }
        },
        IamCommand::Policy => {
            let policy = iam::get_project_policy(client).await?;
            for (role, members) in iam::policy_bindings(&policy) {
                println!("{}", role);
                for member in members {
                    println!("  {}", member);
                }
            }
        },
        IamCommand::AddBinding { role, member } => {
            if iam::add_project_binding(client, role, member).await? {
                println!("Granted {} to {}", role, member);
            } else {
                println!("{} already has {}", member, role);
            }
        },
        IamCommand::RemoveBinding { role, member } => {
            if iam::remove_project_binding(client, role, member).await? {
                println!("Revoked {} from {}", role, member);
            } else {
                println!("{} does not have {}", member, role);
            }
        },
    }
    Ok(())
}

/// Print an operation's progress, or wait for it when asked
async fn finish_healthcare_op(
    client: &GcpClient,
    op: serde_json::Value,
    wait: WaitFlag,
    poll: PollConfig,
) -> Result<()> {
    if wait.wait {
        let progress = healthcare::wait_for_operation(client, &op, poll).await?;
        println!("{}", progress);
        progress.into_result()?;
    } else {
        println!("Started operation {}", healthcare::OperationProgress::from(&op).name);
    }
    Ok(())
}

async fn run_healthcare(cmd: &HealthcareCommand, client: &GcpClient, poll: PollConfig) -> Result<()> {
    match cmd {
        HealthcareCommand::CreateDataset { dataset, wait } => {
            let op = healthcare::create_dataset(client, dataset).await?;
            finish_healthcare_op(client, op, *wait, poll).await?;
        },
        HealthcareCommand::ListDatasets => {
            for dataset in healthcare::list_datasets(client).await? {
                println!("{}", dataset);
            }
        },
        HealthcareCommand::DeleteDataset { dataset } => {
            healthcare::delete_dataset(client, dataset).await?;
            println!("Deleted dataset {}", dataset);
        },
        HealthcareCommand::CreateStore { dataset, store } => {
            healthcare::create_dicom_store(client, dataset, store).await?;
            println!("Created DICOM store {}/{}", dataset, store);
        },
        HealthcareCommand::DescribeStore { dataset, store } => {
            let info = healthcare::get_dicom_store(client, dataset, store).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        },
        HealthcareCommand::DeleteStore { dataset, store } => {
            healthcare::delete_dicom_store(client, dataset, store).await?;
            println!("Deleted DICOM store {}/{}", dataset, store);
        },
        HealthcareCommand::Import {
            dataset,
            store,
            source_uri,
            wait,
        } => {
            let op = healthcare::import_dicom(client, dataset, store, source_uri).await?;
            finish_healthcare_op(client, op, *wait, poll).await?;
        },
        HealthcareCommand::Export {
            dataset,
            store,
            destination_uri,
            wait,
        } => {
            let op = healthcare::export_dicom(client, dataset, store, destination_uri).await?;
            finish_healthcare_op(client, op, *wait, poll).await?;
        },
        HealthcareCommand::Operation { name } => {
            println!("{}", healthcare::get_operation(client, name).await?);
        },
        HealthcareCommand::Studies { dataset, store } => {
            for study in healthcare::search_studies(client, dataset, store).await? {
                println!("{}", study);
            }
        },
        HealthcareCommand::Series {
            dataset,
            store,
            study_uid,
        } => {
            for series in healthcare::search_series(client, dataset, store, study_uid).await? {
                println!("{}", series);
            }
        },
        HealthcareCommand::DeleteStudy {
            dataset,
            store,
            study_uid,
            wait,
        } => {
            let op = healthcare::delete_study(client, dataset, store, study_uid).await?;
            finish_healthcare_op(client, op, *wait, poll).await?;
        },
    }
    Ok(())
}

async fn run_deployments(
    cmd: &DeploymentsCommand,
    client: &GcpClient,
    poll: PollConfig,
) -> Result<()> {
    match cmd {
        DeploymentsCommand::Create { name, config, wait } => {
            let yaml = std::fs::read_to_string(config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let op = deployments::create_deployment(client, name, &yaml).await?;
            if wait.wait {
                deployments::wait_for_operation(client, &op, poll).await?;
                println!("{}", deployments::get_deployment(client, name).await?);
            } else {
                println!("Started operation {}", compute::operation_name(&op)?);
            }
        },
        DeploymentsCommand::Describe { name } => {
            println!("{}", deployments::get_deployment(client, name).await?);
        },
        DeploymentsCommand::List => {
            for deployment in deployments::list_deployments(client).await? {
                println!("{}", deployment);
            }
        },
        DeploymentsCommand::Resources { name } => {
            for resource in deployments::list_deployment_resources(client, name).await? {
                println!("{}", resource);
            }
        },
        DeploymentsCommand::Delete { name, wait } => {
            let op = deployments::delete_deployment(client, name).await?;
            if wait.wait {
                deployments::wait_for_operation(client, &op, poll).await?;
                println!("Deleted deployment {}", name);
            } else {
                println!("Started operation {}", compute::operation_name(&op)?);
            }
        },
    }
    Ok(())
}

fn print_state<T: serde::Serialize>(path: &std::path::Path, exists: bool, state: &T) -> Result<()> {
    if !exists {
        println!("No scenario state at {}", path.display());
        return Ok(());
    }
    println!("{}", path.display());
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

fn print_cleanup(report: &scenario::CleanupReport) -> Result<()> {
    print!("{}", report);
    if report.is_clean() {
        println!("Cleanup complete");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Cleanup incomplete; rerun cleanup to retry the failed steps"
        ))
    }
}

async fn run_scenario(cmd: &ScenarioCommand, client: &GcpClient, poll: PollConfig) -> Result<()> {
    match cmd {
        ScenarioCommand::Compute(sub) => {
            use scenario::compute::{ComputeOptions, ComputeState, SCENARIO_NAME};
            let store: StateFile<ComputeState> = StateFile::for_scenario(SCENARIO_NAME)?;
            match sub {
                ComputeScenarioCommand::Run {
                    instance_name,
                    machine_type,
                    ssh_key_file,
                    ssh_user,
                    stop_start,
                } => {
                    let mut options = ComputeOptions::generated();
                    if let Some(name) = instance_name {
                        options.instance_name = name.clone();
                    }
                    options.machine_type = machine_type.clone();
                    options.stop_start = *stop_start;
                    if let (Some(path), Some(user)) = (ssh_key_file, ssh_user) {
                        let key = std::fs::read_to_string(path)
                            .with_context(|| format!("Failed to read {}", path.display()))?;
                        options.ssh_key = Some((user.clone(), key.trim().to_string()));
                    }
                    scenario::compute::run(client, &options, &store, poll).await?;
                    println!("Scenario complete; run `gcpsnip scenario compute cleanup` to remove it");
                },
                ComputeScenarioCommand::Cleanup => {
                    let report = scenario::compute::cleanup(client, &store, poll).await?;
                    print_cleanup(&report)?;
                },
                ComputeScenarioCommand::Status => {
                    print_state(store.path(), store.exists(), &store.load()?)?;
                },
            }
        },
        ScenarioCommand::Imaging(sub) => {
            use scenario::imaging::{ImagingOptions, ImagingState, SCENARIO_NAME};
            let store: StateFile<ImagingState> = StateFile::for_scenario(SCENARIO_NAME)?;
            match sub {
                ImagingScenarioCommand::Run {
                    source_uri,
                    dataset,
                    store: dicom_store,
                    delete_first_study,
                } => {
                    let mut options = ImagingOptions::generated(source_uri);
                    if let Some(d) = dataset {
                        options.dataset = d.clone();
                    }
                    if let Some(s) = dicom_store {
                        options.store = s.clone();
                    }
                    options.delete_first_study = *delete_first_study;
                    scenario::imaging::run(client, &options, &store, poll).await?;
                    println!("Scenario complete; run `gcpsnip scenario imaging cleanup` to remove it");
                },
                ImagingScenarioCommand::Cleanup => {
                    let report = scenario::imaging::cleanup(client, &store).await?;
                    print_cleanup(&report)?;
                },
                ImagingScenarioCommand::Status => {
                    print_state(store.path(), store.exists(), &store.load()?)?;
                },
            }
        },
        ScenarioCommand::Deployment(sub) => {
            use scenario::deployment::{DeploymentState, SCENARIO_NAME};
            let store: StateFile<DeploymentState> = StateFile::for_scenario(SCENARIO_NAME)?;
            match sub {
                DeploymentScenarioCommand::Run { name, config } => {
                    let yaml = std::fs::read_to_string(config)
                        .with_context(|| format!("Failed to read {}", config.display()))?;
                    scenario::deployment::run(client, name, &yaml, &store, poll).await?;
                },
                DeploymentScenarioCommand::Cleanup => {
                    let report = scenario::deployment::cleanup(client, &store, poll).await?;
                    print_cleanup(&report)?;
                },
                DeploymentScenarioCommand::Status => {
                    print_state(store.path(), store.exists(), &store.load()?)?;
                },
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "gcpsnip", "compute", "list", "--project", "demo-project", "--zone", "europe-west1-b",
        ])
        .unwrap();
        assert_eq!(args.project.as_deref(), Some("demo-project"));
        assert!(matches!(args.command, Command::Compute(ComputeCommand::List)));
    }

    #[test]
    fn test_repeatable_flags() {
        let args = Args::try_parse_from([
            "gcpsnip", "pubsub", "publish", "alerts", "hello", "--attr", "a=1", "--attr", "b=2",
        ])
        .unwrap();
        match args.command {
            Command::Pubsub(PubsubCommand::Publish { attributes, .. }) => {
                assert_eq!(attributes, vec!["a=1", "b=2"]);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_wait_flag_flattened() {
        let args =
            Args::try_parse_from(["gcpsnip", "compute", "stop", "vm-1", "--wait"]).unwrap();
        match args.command {
            Command::Compute(ComputeCommand::Stop { name, wait }) => {
                assert_eq!(name, "vm-1");
                assert!(wait.wait);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ssh_key_requires_user() {
        assert!(Args::try_parse_from([
            "gcpsnip", "scenario", "compute", "run", "--ssh-key-file", "id.pub",
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "gcpsnip", "scenario", "compute", "run", "--ssh-user", "alice",
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "gcpsnip", "scenario", "compute", "run", "--ssh-user", "alice", "--ssh-key-file", "id.pub",
        ])
        .is_ok());
    }

    #[test]
    fn test_time_series_window_must_be_positive() {
        for minutes in ["0", "-5"] {
            assert!(Args::try_parse_from([
                "gcpsnip", "monitoring", "time-series", "custom.googleapis.com/x", "--minutes", minutes,
            ])
            .is_err());
        }
        assert!(Args::try_parse_from([
            "gcpsnip", "monitoring", "time-series", "custom.googleapis.com/x", "--minutes", "15",
        ])
        .is_ok());
    }
}
