//! # 对账领域
//!
//! 把一次抓取得到的规范化记录合并进规范库：
//!
//! - [`Reconciler`] - 批内去重、按自然键分组、选出当前版本并写入
//! - [`diff_fields`] - 字段级差异计算
//! - [`current_rate`] - 按日期查询当前生效的税率
//!
//! 对未变化的输入重复对账不会产生新行或变更事件。

pub mod diff;
pub mod lookup;
pub mod reconciler;

pub use diff::{diff_fields, FieldChange};
pub use lookup::{current_rate, rate_history};
pub use reconciler::{ReconcileReport, Reconciler};
