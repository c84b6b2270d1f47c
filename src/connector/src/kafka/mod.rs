// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Kafka transport. Consumption relies on the consumer-group mechanism
//! for partition assignment, so per-key ordering is the broker's
//! per-partition ordering.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use matchflow_common::config::Properties;
use matchflow_common::error::{ConfigError, EgressError, FlowError, Result};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Timestamp};
use tracing::warn;

use crate::{Egress, Envelope, Ingress, OutputRecord};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    /// Input stream set; one topic per logical stream.
    pub topics: Vec<String>,
    /// Extra librdkafka properties passed through verbatim.
    pub properties: HashMap<String, String>,
}

impl KafkaConfig {
    pub fn from_properties(props: &Properties) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            brokers: props.require("kafka.brokers")?.to_string(),
            group_id: props.require("kafka.group.id")?.to_string(),
            topics: props.get_string_list("kafka.topics")?,
            properties: HashMap::new(),
        })
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "true")
            .set_log_level(RDKafkaLogLevel::Warning);
        for (k, v) in &self.properties {
            config.set(k, v);
        }
        config
    }
}

pub struct KafkaIngress {
    consumer: StreamConsumer,
}

impl KafkaIngress {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = config
            .client_config()
            .create()
            .context("creating kafka consumer")?;
        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .context("subscribing to input streams")?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl Ingress for KafkaIngress {
    async fn next(&mut self) -> Result<Option<Envelope>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| FlowError::Transport(anyhow!(e)))?;

        let key = match message.key() {
            Some(key) => String::from_utf8_lossy(key).into_owned(),
            None => {
                warn!(topic = message.topic(), offset = message.offset(),
                    "record without a key, using the empty key");
                String::new()
            }
        };
        let append_timestamp = match message.timestamp() {
            Timestamp::NotAvailable => None,
            Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) => Some(ms),
        };
        Ok(Some(Envelope {
            stream: message.topic().to_string(),
            key,
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            append_timestamp,
        }))
    }
}

pub struct KafkaEgress {
    producer: FutureProducer,
}

impl KafkaEgress {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .client_config()
            .create()
            .context("creating kafka producer")?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl Egress for KafkaEgress {
    async fn publish(&mut self, record: OutputRecord) -> Result<()> {
        let future_record = FutureRecord::to(&record.stream)
            .key(&record.key)
            .payload(&record.payload);
        self.producer
            .send(future_record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| {
                FlowError::Egress(EgressError::Publish {
                    stream: record.stream.clone(),
                    source: anyhow!(e),
                })
            })?;
        Ok(())
    }
}
