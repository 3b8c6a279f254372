//! 报告渲染
//!
//! 签名针对渲染后的文档字节，同一份报告内容必须渲染出相同的字节。

use std::fmt::Write as _;

use ris_core::display::DisplayName;
use ris_core::integration::{DocumentRenderer, ReportDocument};
use ris_core::{Result, RisError};

/// 纯文本报告单
#[derive(Debug, Clone)]
pub struct PlainTextRenderer {
    hospital_name: String,
}

impl PlainTextRenderer {
    pub fn new(hospital_name: impl Into<String>) -> Self {
        Self {
            hospital_name: hospital_name.into(),
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new("放射科")
    }
}

impl PlainTextRenderer {
    fn write(&self, out: &mut String, document: &ReportDocument<'_>) -> std::fmt::Result {
        let ReportDocument {
            order,
            exam,
            report,
        } = document;

        writeln!(out, "{} 影像诊断报告", self.hospital_name)?;
        writeln!(out, "申请单号: {}", order.request_code)?;
        writeln!(out, "检查号: {}", exam.accession_number)?;
        writeln!(out, "检查项目: {}", order.service_name)?;
        if let Some(body_part) = &order.body_part {
            writeln!(out, "检查部位: {}", body_part)?;
        }
        writeln!(out, "患者类别: {}", order.patient_category.display_name())?;
        writeln!(out, "优先级: {}", order.priority.display_name())?;
        if let Some(started_at) = exam.started_at {
            writeln!(out, "检查时间: {}", started_at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(uid) = &exam.study_instance_uid {
            writeln!(out, "Study UID: {}", uid)?;
        }
        writeln!(out)?;
        writeln!(out, "检查所见:")?;
        writeln!(out, "{}", report.content.findings)?;
        if let Some(impression) = &report.content.impression {
            writeln!(out, "诊断意见:")?;
            writeln!(out, "{}", impression)?;
        }
        if let Some(recommendations) = &report.content.recommendations {
            writeln!(out, "建议:")?;
            writeln!(out, "{}", recommendations)?;
        }
        writeln!(out)?;
        writeln!(out, "报告医生: {}", report.author_id)?;
        writeln!(out, "报告编号: {}", report.id)
    }
}

impl DocumentRenderer for PlainTextRenderer {
    fn render(&self, document: &ReportDocument<'_>) -> Result<Vec<u8>> {
        let mut out = String::new();
        self.write(&mut out, document)
            .map_err(|e| RisError::Validation(format!("报告渲染失败: {}", e)))?;
        Ok(out.into_bytes())
    }
}
