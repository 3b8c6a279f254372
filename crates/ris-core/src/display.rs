//! 状态显示名称
//!
//! 仅供界面展示使用的静态对照表，与状态转换逻辑无关。

use crate::models::*;

pub trait DisplayName {
    fn display_name(&self) -> &'static str;
}

impl DisplayName for OrderStatus {
    fn display_name(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "待执行",
            OrderStatus::Scheduled => "已预约",
            OrderStatus::InProgress => "检查中",
            OrderStatus::Completed => "已检查",
            OrderStatus::Reported => "已出报告",
            OrderStatus::Approved => "已审核",
            OrderStatus::Cancelled => "已取消",
        }
    }
}

impl DisplayName for OrderPriority {
    fn display_name(&self) -> &'static str {
        match self {
            OrderPriority::Normal => "普通",
            OrderPriority::Urgent => "加急",
            OrderPriority::Emergency => "急诊",
        }
    }
}

impl DisplayName for PatientCategory {
    fn display_name(&self) -> &'static str {
        match self {
            PatientCategory::Insured => "医保",
            PatientCategory::SelfPay => "自费",
        }
    }
}

impl DisplayName for ReportStatus {
    fn display_name(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "草稿",
            ReportStatus::PreliminaryApproved => "初审通过",
            ReportStatus::FinalApproved => "终审通过",
        }
    }
}

impl DisplayName for QueueStatus {
    fn display_name(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "等待中",
            QueueStatus::Called => "已叫号",
            QueueStatus::InProgress => "检查中",
            QueueStatus::Completed => "已完成",
            QueueStatus::Skipped => "已过号",
        }
    }
}

impl DisplayName for SignatureType {
    fn display_name(&self) -> &'static str {
        match self {
            SignatureType::HardwareToken => "USB Token",
            SignatureType::ESignature => "电子签名",
            SignatureType::RemoteService => "远程签名",
        }
    }
}

impl DisplayName for SignatureStatus {
    fn display_name(&self) -> &'static str {
        match self {
            SignatureStatus::Signed => "已签名",
            SignatureStatus::Rejected => "已拒签",
            SignatureStatus::Cancelled => "已撤销",
        }
    }
}

impl DisplayName for SessionStatus {
    fn display_name(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "已安排",
            SessionStatus::InProgress => "进行中",
            SessionStatus::Completed => "已结束",
            SessionStatus::Cancelled => "已取消",
        }
    }
}

impl DisplayName for ParticipantStatus {
    fn display_name(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "已邀请",
            ParticipantStatus::Accepted => "已接受",
            ParticipantStatus::Declined => "已拒绝",
            ParticipantStatus::Joined => "已加入",
            ParticipantStatus::Left => "已离开",
        }
    }
}

impl DisplayName for ParticipantRole {
    fn display_name(&self) -> &'static str {
        match self {
            ParticipantRole::Leader => "主持人",
            ParticipantRole::Secretary => "记录员",
            ParticipantRole::Participant => "参与者",
            ParticipantRole::Observer => "旁听",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(OrderStatus::Approved.display_name(), "已审核");
        assert_eq!(QueueStatus::Skipped.display_name(), "已过号");
        assert_eq!(ReportStatus::Draft.display_name(), "草稿");
    }
}
