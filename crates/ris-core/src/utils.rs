//! 通用工具函数

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

/// 服务器时间来源，所有时间戳都由服务端生成
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟，用于测试
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn random_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_uppercase()
}

/// 生成检查号 (Accession Number)
pub fn generate_accession_number(now: DateTime<Utc>) -> String {
    format!("ACC{}{}", now.format("%Y%m%d%H%M%S"), random_hex(6))
}

/// 生成申请单号
pub fn generate_request_code(now: DateTime<Utc>) -> String {
    format!("RQ{}{}", now.format("%Y%m%d%H%M%S"), random_hex(4))
}

/// 生成会诊编号
pub fn generate_session_code(now: DateTime<Utc>) -> String {
    format!("HZ{}{}", now.format("%Y%m%d%H%M%S"), random_hex(4))
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
        && !uid.contains("..")
}

/// 去除首尾空白，空字符串视为缺失
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
