//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements       | Connects to                    |
//! |------------|------------------|--------------------------------|
//! | `wifi`     | ConnectivityPort | ESP-IDF Wi-Fi STA / host sim   |
//! | `mqtt`     | PublisherPort    | ESP-IDF MQTT client / host sim |
//! | `sntp`     | SntpPort         | ESP-IDF SNTP / host sim        |
//! | `time`     | —                | ESP32 system timer             |
//! | `nvs`      | ConfigPort       | NVS / in-memory store          |
//! | `log_sink` | EventSink        | Serial log output              |

pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod sntp;
pub mod time;
pub mod wifi;
