//! 骨骼-物理桥接：构建、驱动模式修正和双向同步

mod common;

use common::{sample_skeleton, Level, RecordingLogger, RecordingPhysics};
use glam::{Mat4, Quat, Vec3};

use mmd_runtime::physics::capability::{MotionType, PhysicsCapability, RigidTransform};
use mmd_runtime::skeleton::BoneHierarchy;
use mmd_runtime::{
    BuildError, DriveMode, JointDefinition, NullLogger, PhysicsConfig, PhysicsModelBuilder,
    RapierPhysics, RigidBodyDefinition, ShapeType,
};

fn body(name: &str, bone_index: i32, drive_mode: DriveMode) -> RigidBodyDefinition {
    RigidBodyDefinition {
        name: name.to_string(),
        bone_index,
        shape_size: Vec3::new(0.5, 1.0, 0.5),
        drive_mode,
        ..Default::default()
    }
}

fn joint(name: &str, a: i32, b: i32) -> JointDefinition {
    JointDefinition {
        name: name.to_string(),
        rigid_body_a: a,
        rigid_body_b: b,
        ..Default::default()
    }
}

fn assert_vec3_near(actual: Vec3, expected: Vec3) {
    assert!(
        (actual - expected).length() < 1e-4,
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}

#[test]
fn test_nodes_sorted_by_bone_depth() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let rigid_bodies = vec![
        body("髪", 3, DriveMode::Dynamic),
        body("センター", 0, DriveMode::BoneFollowing),
        body("頭", 2, DriveMode::BoneFollowing),
    ];

    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &rigid_bodies, &[], &mut physics)
        .unwrap();

    let order: Vec<usize> = model
        .nodes()
        .iter()
        .flatten()
        .map(|n| n.definition_index)
        .collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert_eq!(model.node_count(), 3);
}

#[test]
fn test_body_offset_restores_bone_transform() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut definition = body("髪", 3, DriveMode::Dynamic);
    definition.shape_position = Vec3::new(0.0, 15.5, 1.2);
    definition.shape_rotation = Vec3::new(0.3, 0.2, 0.1);

    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &[definition], &[], &mut physics)
        .unwrap();

    let node = model.find_node(0).unwrap();
    assert!((node.body_offset * node.body_offset_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    let restored = node.local_matrix() * node.body_offset_inverse;
    assert!(restored.abs_diff_eq(bones.world_matrix(3), 1e-4));

    // 初始位置就是形状位置
    let created = physics.bodies[0].desc.transform;
    assert_vec3_near(created.translation, Vec3::new(0.0, 15.5, 1.2));
}

#[test]
fn test_root_transform_places_bodies_in_world() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut definition = body("頭", 2, DriveMode::BoneFollowing);
    definition.shape_position = Vec3::new(0.0, 15.0, 0.0);
    let root = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));

    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(root, &bones, &[definition], &[], &mut physics)
        .unwrap();

    assert_vec3_near(physics.bodies[0].desc.transform.translation, Vec3::new(10.0, 15.0, 0.0));
    // 节点保存模型空间变换
    assert_vec3_near(model.find_node(0).unwrap().position, Vec3::new(0.0, 15.0, 0.0));
    assert_eq!(physics.bodies[0].desc.motion_type, MotionType::Kinematic);
    assert_eq!(physics.bodies[0].desc.mass, 0.0);
}

#[test]
fn test_follow_bone_promoted_when_parent_is_simulated() {
    let bones = sample_skeleton();

    for (a, b) in [(0, 1), (1, 0)] {
        let mut physics = RecordingPhysics::new();
        let rigid_bodies = vec![
            body("頭", 2, DriveMode::Dynamic),
            body("髪", 3, DriveMode::DynamicFollowsBone),
        ];
        let model = PhysicsModelBuilder::new(&NullLogger)
            .build(
                Mat4::IDENTITY,
                &bones,
                &rigid_bodies,
                &[joint("j", a, b)],
                &mut physics,
            )
            .unwrap();

        assert_eq!(model.find_node(1).unwrap().drive_mode, DriveMode::Dynamic);
        assert_eq!(model.find_node(0).unwrap().drive_mode, DriveMode::Dynamic);
    }
}

#[test]
fn test_promotion_checks_direct_parent_only() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    // 髪先 的父骨骼是 髪，不是 頭
    let rigid_bodies = vec![
        body("頭", 2, DriveMode::Dynamic),
        body("髪先", 4, DriveMode::DynamicFollowsBone),
    ];
    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(
            Mat4::IDENTITY,
            &bones,
            &rigid_bodies,
            &[joint("j", 0, 1)],
            &mut physics,
        )
        .unwrap();

    assert_eq!(
        model.find_node(1).unwrap().drive_mode,
        DriveMode::DynamicFollowsBone
    );
}

#[test]
fn test_bone_following_parent_does_not_promote() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let rigid_bodies = vec![
        body("頭", 2, DriveMode::BoneFollowing),
        body("髪", 3, DriveMode::DynamicFollowsBone),
    ];
    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(
            Mat4::IDENTITY,
            &bones,
            &rigid_bodies,
            &[joint("j", 0, 1)],
            &mut physics,
        )
        .unwrap();

    assert_eq!(
        model.find_node(1).unwrap().drive_mode,
        DriveMode::DynamicFollowsBone
    );
}

#[test]
fn test_zero_volume_shape_does_not_collide() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut flat = body("flat", 2, DriveMode::BoneFollowing);
    flat.shape_type = ShapeType::Box;
    flat.shape_size = Vec3::new(1.0, 0.0, 1.0);
    flat.collision_group = 3;
    let mut solid = body("solid", 2, DriveMode::BoneFollowing);
    solid.collision_mask = 0x00F0;

    PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &[flat, solid], &[], &mut physics)
        .unwrap();

    assert_eq!(physics.shapes[0].membership, 1 << 3);
    assert_eq!(physics.shapes[0].collide_mask, 0);
    assert_eq!(physics.shapes[1].collide_mask, 0x00F0);
}

#[test]
fn test_unresolved_bone_skips_body_with_warning() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let logger = RecordingLogger::default();
    let missing = body("missing", 99, DriveMode::Dynamic);

    let model = PhysicsModelBuilder::new(&logger)
        .build(Mat4::IDENTITY, &bones, &[missing], &[], &mut physics)
        .unwrap();

    assert_eq!(model.node_count(), 0);
    assert!(physics.bodies.is_empty());
    assert_eq!(
        logger.messages_at(Level::Warn),
        vec!["Bone index out of range create unmapped rigid body: missing".to_string()]
    );
}

#[test]
fn test_bone_resolved_by_name_when_index_out_of_range() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut by_name = body("hair", -1, DriveMode::Dynamic);
    by_name.bone_name = Some("髪".to_string());
    // 没有骨骼名时使用刚体名
    let by_body_name = body("頭", 42, DriveMode::BoneFollowing);

    let model = PhysicsModelBuilder::new(&NullLogger)
        .build(
            Mat4::IDENTITY,
            &bones,
            &[by_name, by_body_name],
            &[],
            &mut physics,
        )
        .unwrap();

    assert_eq!(model.find_node(0).unwrap().bone, Some(3));
    assert_eq!(model.find_node(1).unwrap().bone, Some(2));
}

#[test]
fn test_unknown_shape_is_skipped() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let logger = RecordingLogger::default();
    let mut strange = body("strange", 2, DriveMode::BoneFollowing);
    strange.shape_type = ShapeType::from(7);

    let model = PhysicsModelBuilder::new(&logger)
        .build(Mat4::IDENTITY, &bones, &[strange], &[], &mut physics)
        .unwrap();

    assert_eq!(model.node_count(), 0);
    assert!(physics.shapes.is_empty());
    assert_eq!(
        logger.messages_at(Level::Warn),
        vec!["Unknown rigid body shape type: 7".to_string()]
    );
}

#[test]
fn test_invalid_joints_are_skipped() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let logger = RecordingLogger::default();
    let rigid_bodies = vec![
        body("頭", 2, DriveMode::BoneFollowing),
        body("missing", 99, DriveMode::Dynamic),
    ];
    let joints = vec![joint("far", 0, 5), joint("orphan", 0, 1)];

    let model = PhysicsModelBuilder::new(&logger)
        .build(Mat4::IDENTITY, &bones, &rigid_bodies, &joints, &mut physics)
        .unwrap();

    assert_eq!(model.constraints(), &[None, None]);
    assert!(physics.constraints.is_empty());
    let warnings = logger.messages_at(Level::Warn);
    assert!(warnings.contains(&"Rigid body index out of range failed to create joint: far".to_string()));
    assert!(warnings.contains(&"Rigid body not found failed to create joint: orphan".to_string()));
}

#[test]
fn test_joint_frames_in_body_space() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut a = body("頭", 2, DriveMode::BoneFollowing);
    a.shape_position = Vec3::new(0.0, 15.0, 0.0);
    let mut b = body("髪", 3, DriveMode::Dynamic);
    b.shape_position = Vec3::new(0.0, 16.0, 1.0);
    let mut j = joint("j", 0, 1);
    j.position = Vec3::new(0.0, 16.0, 0.5);
    j.spring_rotation = Vec3::new(0.0, 50.0, 0.0);

    PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &[a, b], &[j], &mut physics)
        .unwrap();

    let (_, _, desc) = physics.constraints[0];
    assert_vec3_near(desc.frame_a.translation, Vec3::new(0.0, 1.0, 0.5));
    assert_vec3_near(desc.frame_b.translation, Vec3::new(0.0, 0.0, -0.5));
    assert_eq!(desc.angular_stiffness, [None, Some(50.0), None]);
    assert_eq!(desc.linear_stiffness, [None, None, None]);
}

#[test]
fn test_engine_checks() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let result = PhysicsModelBuilder::new(&NullLogger)
        .with_expected_engine("bullet")
        .build(Mat4::IDENTITY, &bones, &[], &[], &mut physics);
    assert_eq!(
        result.unwrap_err(),
        BuildError::EngineMismatch {
            expected: "bullet".to_string(),
            found: "recording".to_string(),
        }
    );

    physics.enabled = false;
    let result = PhysicsModelBuilder::new(&NullLogger).build(Mat4::IDENTITY, &bones, &[], &[], &mut physics);
    assert_eq!(result.unwrap_err(), BuildError::EngineUnavailable);
}

#[test]
fn test_non_uniform_root_scale_warns() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let logger = RecordingLogger::default();
    PhysicsModelBuilder::new(&logger)
        .build(
            Mat4::from_scale(Vec3::new(1.0, 2.0, 1.0)),
            &bones,
            &[],
            &[],
            &mut physics,
        )
        .unwrap();
    assert_eq!(logger.messages_at(Level::Warn).len(), 1);
}

#[test]
fn test_bone_following_body_tracks_bone() {
    let mut bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut head = body("頭", 2, DriveMode::BoneFollowing);
    head.shape_position = Vec3::new(0.0, 15.5, 0.0);
    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &[head], &[], &mut physics)
        .unwrap();

    bones.set_bone_translation(1, Vec3::new(0.0, 5.0, 0.0));
    bones.update_transforms();
    model.sync_bodies_from_bones(&bones, &mut physics);

    let target = physics.bodies[0].kinematic_target.unwrap();
    assert_vec3_near(target.translation, Vec3::new(0.0, 20.5, 0.0));
}

#[test]
fn test_dynamic_body_drives_bone() {
    let mut bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut hair = body("髪", 3, DriveMode::Dynamic);
    hair.shape_position = Vec3::new(0.0, 16.5, 1.0);
    let root = Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0));
    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .build(root, &bones, &[hair], &[], &mut physics)
        .unwrap();
    bones.update_transforms();

    // 模拟结果：世界空间
    let rotation = Quat::from_rotation_x(0.5);
    let simulated = Vec3::new(3.0, 4.0, 5.0);
    let world = root * Mat4::from_rotation_translation(rotation, simulated);
    physics.bodies[0].transform = RigidTransform::from_mat4(world);

    model.sync_bones_from_bodies(&mut bones, &physics);

    let expected = simulated + rotation * Vec3::new(0.0, -0.5, 0.0);
    assert_vec3_near(bones.world_translation(3), expected);
    // 子骨骼跟随
    let tip = expected + rotation * Vec3::new(0.0, -2.0, 0.0);
    assert_vec3_near(bones.world_translation(4), tip);
}

#[test]
fn test_dynamic_follows_bone_keeps_bone_position() {
    let mut bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let mut hair = body("髪", 3, DriveMode::DynamicFollowsBone);
    hair.shape_position = Vec3::new(0.0, 16.5, 1.0);
    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &[hair], &[], &mut physics)
        .unwrap();

    // 父骨骼被动画移动
    bones.set_bone_translation(1, Vec3::new(0.0, 5.0, 0.0));
    bones.update_transforms();
    assert_vec3_near(bones.world_translation(3), Vec3::new(0.0, 21.0, 1.0));

    // 刚体落后在别处，但有新的朝向
    let rotation = Quat::from_rotation_x(0.5);
    physics.bodies[0].transform = RigidTransform::new(Vec3::new(100.0, 100.0, 100.0), rotation);

    model.sync_bones_from_bodies(&mut bones, &physics);

    assert_vec3_near(bones.world_translation(3), Vec3::new(0.0, 21.0, 1.0));
    let (_, bone_rotation, _) = bones.world_matrix(3).to_scale_rotation_translation();
    assert!(bone_rotation.abs_diff_eq(rotation, 1e-4));
    let tip = Vec3::new(0.0, 21.0, 1.0) + rotation * Vec3::new(0.0, -2.0, 0.0);
    assert_vec3_near(bones.world_translation(4), tip);
}

#[test]
fn test_initialize_schedules_kinematic_pulse_once() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let rigid_bodies = vec![
        body("頭", 2, DriveMode::BoneFollowing),
        body("髪", 3, DriveMode::Dynamic),
    ];
    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .build(Mat4::IDENTITY, &bones, &rigid_bodies, &[], &mut physics)
        .unwrap();
    let hair = model.find_node(1).unwrap().body;
    let head = model.find_node(0).unwrap().body;

    physics.set_velocities(hair, Vec3::ONE, Vec3::ONE);
    model.initialize(&bones, &mut physics);
    model.initialize(&bones, &mut physics);

    for index in 0..2 {
        let node = model.find_node(index).unwrap();
        assert!((node.body_offset * node.body_offset_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    assert_eq!(physics.after_step.len(), 1);
    assert_eq!(physics.motion_type(hair), MotionType::Kinematic);
    assert_eq!(physics.motion_type(head), MotionType::Kinematic);
    assert_eq!(physics.body(hair).linear_velocity, Vec3::ZERO);
    assert!(physics.body(hair).kinematic_target.is_some());

    physics.step(1.0 / 60.0);
    assert_eq!(physics.motion_type(hair), MotionType::Dynamic);
    assert_eq!(physics.motion_type(head), MotionType::Kinematic);
    assert!(physics.after_step.is_empty());
}

#[test]
fn test_dispose_releases_everything_in_order() {
    let bones = sample_skeleton();
    let mut physics = RecordingPhysics::new();
    let rigid_bodies = vec![
        body("頭", 2, DriveMode::BoneFollowing),
        body("髪", 3, DriveMode::Dynamic),
    ];
    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .build(
            Mat4::IDENTITY,
            &bones,
            &rigid_bodies,
            &[joint("j", 0, 1)],
            &mut physics,
        )
        .unwrap();

    model.dispose(&mut physics);

    assert_eq!(
        physics.removals,
        vec!["constraint:0", "shape:0", "body:0", "shape:1", "body:1"]
    );
    assert_eq!(model.node_count(), 0);
    assert_eq!(model.constraint_count(), 0);
    assert!(model.nodes().is_empty());
}

#[test]
fn test_definitions_from_json() {
    let json = r#"[
        {"name": "髪", "bone_index": 3, "shape_type": "Capsule",
         "shape_size": [0.5, 2.0, 0.0], "drive_mode": "Dynamic", "mass": 2.5},
        {"name": "odd", "shape_type": {"Unknown": 9}}
    ]"#;
    let definitions: Vec<RigidBodyDefinition> = serde_json::from_str(json).unwrap();

    assert_eq!(definitions[0].shape_type, ShapeType::Capsule);
    assert_eq!(definitions[0].shape_size, Vec3::new(0.5, 2.0, 0.0));
    assert_eq!(definitions[0].drive_mode, DriveMode::Dynamic);
    assert_eq!(definitions[0].mass, 2.5);
    // 未给出的字段使用默认值
    assert_eq!(definitions[0].collision_mask, 0xFFFF);
    assert_eq!(definitions[1].bone_index, -1);
    assert_eq!(definitions[1].shape_type, ShapeType::Unknown(9));
}

#[test]
fn test_rapier_backend_simulates_chain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut bones = sample_skeleton();
    let mut physics = RapierPhysics::with_config(PhysicsConfig::default());
    let mut head = body("頭", 2, DriveMode::BoneFollowing);
    head.shape_position = Vec3::new(0.0, 15.0, 0.0);
    let mut hair = body("髪", 3, DriveMode::Dynamic);
    hair.shape_type = ShapeType::Capsule;
    hair.shape_position = Vec3::new(0.0, 16.0, 1.0);
    hair.collision_group = 1;
    hair.collision_mask = 0xFFFF & !1;
    let mut j = joint("j", 0, 1);
    j.position = Vec3::new(0.0, 15.5, 0.5);
    j.rotation_min = Vec3::splat(-0.5);
    j.rotation_max = Vec3::splat(0.5);

    let mut model = PhysicsModelBuilder::new(&NullLogger)
        .with_expected_engine(RapierPhysics::ENGINE_NAME)
        .build(Mat4::IDENTITY, &bones, &[head, hair], &[j], &mut physics)
        .unwrap();
    assert_eq!(physics.body_count(), 2);
    assert_eq!(physics.constraint_count(), 1);

    model.initialize(&bones, &mut physics);
    assert_eq!(physics.pending_after_step(), 1);

    for _ in 0..30 {
        bones.update_transforms();
        model.sync_bodies_from_bones(&bones, &mut physics);
        physics.step(1.0 / 60.0);
        model.sync_bones_from_bodies(&mut bones, &physics);
    }

    assert_eq!(physics.pending_after_step(), 0);
    assert!(bones.world_translation(3).is_finite());

    model.dispose(&mut physics);
    assert_eq!(physics.body_count(), 0);
    assert_eq!(physics.constraint_count(), 0);
}
