//! 骨骼层级访问接口
//!
//! 物理桥接只通过这个 trait 读写骨骼，不关心骨骼系统的具体实现。
//! 骨骼按索引寻址，物理节点只保存索引（弱引用），从不持有骨骼本身。

use glam::{Mat4, Vec3};

/// 骨骼层级视图
///
/// 世界矩阵均为模型空间。`set_world_matrix` 是物理系统专用的写入口：
/// 直接覆盖世界矩阵，绕过骨骼系统自身的局部→全局传播，
/// 写入后必须调用 [`BoneHierarchy::force_recompute_children`]。
pub trait BoneHierarchy {
    /// 骨骼数量
    fn bone_count(&self) -> usize;

    /// 骨骼名称
    fn bone_name(&self, index: usize) -> Option<&str>;

    /// 父骨骼索引（根骨骼返回 None）
    fn parent_bone(&self, index: usize) -> Option<usize>;

    /// 直接子骨骼索引
    fn child_bones(&self, index: usize) -> Vec<usize>;

    /// 世界矩阵
    fn world_matrix(&self, index: usize) -> Mat4;

    /// 直接写入世界矩阵（不更新局部变换，不传播到子骨骼）
    fn set_world_matrix(&mut self, index: usize, matrix: Mat4);

    /// 按 `父世界矩阵 * 局部矩阵` 重新计算单个骨骼的世界矩阵
    fn update_world_matrix(&mut self, index: usize);

    /// 通过名称查找骨骼
    fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        (0..self.bone_count()).find(|&i| self.bone_name(i) == Some(name))
    }

    /// 世界空间平移
    fn world_translation(&self, index: usize) -> Vec3 {
        self.world_matrix(index).w_axis.truncate()
    }

    /// 只替换世界矩阵的平移分量
    fn set_world_translation(&mut self, index: usize, translation: Vec3) {
        let mut matrix = self.world_matrix(index);
        matrix.w_axis = translation.extend(1.0);
        self.set_world_matrix(index, matrix);
    }

    /// 强制所有后代骨骼按父骨骼当前世界矩阵重新计算
    fn force_recompute_children(&mut self, index: usize) {
        let mut stack = self.child_bones(index);
        while let Some(child) = stack.pop() {
            self.update_world_matrix(child);
            stack.extend(self.child_bones(child));
        }
    }
}

/// 计算每个骨骼的层级深度（根骨骼为 0）
///
/// 从每个根骨骼出发做栈式遍历。父索引成环或越界的骨骼不会被任何根访问到，
/// 深度记为 -1。
pub fn compute_bone_depths(bones: &dyn BoneHierarchy) -> Vec<i32> {
    let count = bones.bone_count();
    let mut depths = vec![-1; count];
    let mut stack: Vec<(usize, i32)> = (0..count)
        .filter(|&i| bones.parent_bone(i).is_none())
        .map(|i| (i, 0))
        .collect();

    while let Some((index, depth)) = stack.pop() {
        if depths[index] >= 0 {
            continue;
        }
        depths[index] = depth;
        for child in bones.child_bones(index) {
            if child < count && depths[child] < 0 {
                stack.push((child, depth + 1));
            }
        }
    }

    depths
}
